//! # steno-core
//!
//! The concurrent control plane of the steno ingest daemon: the Recording
//! Engine, Event Broadcaster, Command Dispatcher, Summary Coordinator, and
//! the Repository contract they share.
//!
//! ## Architecture
//!
//! ```text
//! client ──NDJSON──▶ (socket server, steno-daemon) ──▶ Dispatcher ──▶ Engine ──▶ Recognizer
//!                                                           ▲                       │
//!                                                           │                  AudioSource
//!                                                           │
//!                                      Engine ──events──▶ Broadcaster ──NDJSON──▶ client
//!                                        │
//!                                        ▼
//!                                  Coordinator ──▶ Summarizer ──▶ Repository
//! ```
//!
//! Audio capture, the speech recognizer implementation, and the LLM backends
//! are external collaborators: this crate only defines the traits they must
//! satisfy and drives them.

#![warn(clippy::all)]

pub mod broadcaster;
pub mod collaborators;
pub mod coordinator;
pub mod dispatcher;
pub mod domain;
pub mod engine;
pub mod error;
pub mod repository;
pub mod wire;

pub use broadcaster::EventBroadcaster;
pub use collaborators::{
    AudioSource, AudioSourceFactory, PcmBuffer, PermissionProbe, RecognizerHandle, Repository,
    SpeechRecognizerFactory, Summarizer,
};
pub use coordinator::{CoordinatorConfig, SummaryCoordinator};
pub use dispatcher::CommandDispatcher;
pub use domain::{
    EngineEvent, EngineStatus, RecognizerResult, Session, SessionStatus, Source, StoredSegment,
    Summary, SummaryType, Topic,
};
pub use engine::RecordingEngine;
pub use error::{CollaboratorError, EngineError, RepositoryError};
