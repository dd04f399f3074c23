//! The data model shared by the Repository, Engine, Coordinator and wire
//! protocol: `Session`, `StoredSegment`, `Summary`, `Topic`, plus the
//! transient `RecognizerResult` and the internal `EngineEvent` tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audio provenance tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    Microphone,
    SystemAudio,
}

/// One continuous recording. At most one session is ever `Active` at a
/// time in the process (see `EngineError::AlreadyRecording`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub locale: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
}

/// One finalized recognizer utterance. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSegment {
    pub id: Uuid,
    pub session_id: Uuid,
    pub text: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub confidence: Option<f32>,
    /// 1-based, dense per session, unique per `(session_id, sequence_number)`.
    pub sequence_number: u64,
    pub source: Source,
    pub created_at: DateTime<Utc>,
}

/// A rolling textual summary covering a contiguous, 1-based inclusive
/// segment range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub id: Uuid,
    pub session_id: Uuid,
    pub content: String,
    pub summary_type: SummaryType,
    pub segment_range_start: u64,
    pub segment_range_end: u64,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryType {
    Rolling,
    Final,
}

/// An immutable, ranged discussion label. Never mutated or replaced once
/// persisted (testable property 3, "topic monotonicity").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: Uuid,
    pub session_id: Uuid,
    pub title: String,
    pub summary: String,
    pub segment_range_start: u64,
    pub segment_range_end: u64,
    pub created_at: DateTime<Utc>,
}

/// Engine status, following `spec.md` §3's state machine:
///
/// ```text
/// idle ──start──▶ starting ──(permission+session+audio OK)──▶ recording
///   ▲                │                                          │
///   │                └──(any setup failure)──▶ error            │
///   │                                                           │
///   └────────────────────── stop ◀──────────  stopping ◀────────┘
/// error ──start──▶ starting   (recoverable)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Idle,
    Starting,
    Recording,
    Stopping,
    Error,
}

/// Transient recognizer output — never persisted directly; the engine
/// derives a `StoredSegment` from final results.
#[derive(Debug, Clone)]
pub struct RecognizerResult {
    pub text: String,
    pub is_final: bool,
    pub confidence: Option<f32>,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
}

/// The internal event tag passed from the Engine (C6) to the Broadcaster
/// (C7). Broadcaster maps each variant to a wire `Event` (see
/// `wire::Event` and the mapping table in `spec.md` §4.5).
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StatusChanged(EngineStatus),
    PartialText { text: String, source: Source },
    SegmentFinalized(StoredSegment),
    Error { message: String, is_transient: bool },
    ModelProcessing(bool),
    TopicsUpdated(Vec<Topic>),
    Level { mic: f32, sys: f32 },
}
