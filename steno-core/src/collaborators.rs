//! Capability-set traits for the five injected collaborators named in
//! `spec.md` §9: repository, permission probe, audio factory, recognizer
//! factory, summarizer. Generalizes the teacher's `SpeechModel` /
//! `ModelHandle(Arc<Mutex<dyn SpeechModel>>)` pattern: each collaborator is
//! a plain trait object behind an `Arc`, no deep inheritance.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::{RecognizerResult, Session, Source, StoredSegment, Summary, Topic};
use crate::error::{CollaboratorError, RepositoryError};

/// C1 — durable storage of sessions, segments, summaries, topics.
///
/// All operations are asynchronous and take at most one logical write or
/// read; a concrete implementation (see [`crate::repository::sqlite`])
/// serializes writes per session and lets readers proceed against a
/// consistent snapshot.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_session(&self, locale: &str) -> Result<Session, RepositoryError>;
    async fn end_session(&self, id: uuid::Uuid) -> Result<(), RepositoryError>;
    async fn session(&self, id: uuid::Uuid) -> Result<Option<Session>, RepositoryError>;
    async fn all_sessions(&self) -> Result<Vec<Session>, RepositoryError>;
    async fn delete_session(&self, id: uuid::Uuid) -> Result<(), RepositoryError>;

    async fn save_segment(&self, segment: StoredSegment) -> Result<(), RepositoryError>;
    async fn segments(&self, session_id: uuid::Uuid) -> Result<Vec<StoredSegment>, RepositoryError>;
    async fn segments_between(
        &self,
        from: chrono::DateTime<chrono::Utc>,
        to: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<StoredSegment>, RepositoryError>;
    async fn segment_count(&self, session_id: uuid::Uuid) -> Result<u64, RepositoryError>;

    async fn save_summary(&self, summary: Summary) -> Result<(), RepositoryError>;
    async fn summaries(&self, session_id: uuid::Uuid) -> Result<Vec<Summary>, RepositoryError>;
    async fn latest_summary(
        &self,
        session_id: uuid::Uuid,
    ) -> Result<Option<Summary>, RepositoryError>;

    async fn save_topic(&self, topic: Topic) -> Result<(), RepositoryError>;
    async fn topics(&self, session_id: uuid::Uuid) -> Result<Vec<Topic>, RepositoryError>;
}

/// C3 — produces a single-use [`AudioSource`] for a given device preference
/// and provenance tag, and enumerates available capture devices for the
/// `devices` command (spec.md §4.6). Named "audio factory" among the five
/// injected collaborators.
pub trait AudioSourceFactory: Send + Sync {
    fn make(
        &self,
        device: Option<&str>,
        source: Source,
    ) -> Result<Box<dyn AudioSource>, CollaboratorError>;

    fn list_devices(&self) -> Vec<String>;
}

/// A single-use, lazy source of PCM buffers.
///
/// `start` is called at most once per instance. `stop` releases all
/// resources and is idempotent.
#[async_trait]
pub trait AudioSource: Send {
    /// Open the source and begin producing buffers, returning the declared
    /// sample format alongside the buffer stream.
    async fn start(&mut self) -> Result<BoxStream<'static, Result<PcmBuffer, CollaboratorError>>, CollaboratorError>;

    /// Idempotent; releases all resources.
    async fn stop(&mut self);
}

/// Declared PCM format plus payload for one buffer.
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// C4 — produces a [`RecognizerHandle`] per `(locale, sample_rate)` pair.
pub trait SpeechRecognizerFactory: Send + Sync {
    fn make(
        &self,
        locale: &str,
        sample_rate: u32,
    ) -> Result<Box<dyn RecognizerHandle>, CollaboratorError>;
}

/// A running recognizer session. `transcribe` is called exactly once by the
/// engine's pipeline task with the audio source's buffer stream, and returns
/// the lazy result sequence; `stop` propagates cancellation so that stream
/// terminates rather than throws (spec.md §4.2).
#[async_trait]
pub trait RecognizerHandle: Send {
    fn transcribe(
        &mut self,
        buffers: BoxStream<'static, Result<PcmBuffer, CollaboratorError>>,
    ) -> BoxStream<'static, Result<RecognizerResult, CollaboratorError>>;

    /// Idempotent; causes the stream returned by `transcribe` to terminate.
    async fn stop(&mut self);
}

/// Probes whether the process is allowed to capture audio from the given
/// source. Out-of-scope collaborators (actual OS permission prompts) are
/// excluded per `spec.md` §1; this trait is the seam the engine calls
/// through.
pub trait PermissionProbe: Send + Sync {
    fn check(&self, source: Source) -> Result<(), String>;
}

/// C2 — external LLM-backed summarization service, called by the
/// Coordinator (C5). Every call is wrapped by the coordinator in a
/// `llmTimeout` bound; implementations need not self-impose a timeout.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        segments: &[StoredSegment],
        previous_summary: Option<&Summary>,
    ) -> Result<String, CollaboratorError>;

    async fn generate_meeting_notes(
        &self,
        segments: &[StoredSegment],
        previous_notes: Option<&str>,
    ) -> Result<String, CollaboratorError>;

    async fn extract_topics(
        &self,
        uncovered_segments: &[StoredSegment],
        previous_topics: &[Topic],
        session_id: uuid::Uuid,
    ) -> Result<Vec<Topic>, CollaboratorError>;
}
