//! NDJSON wire protocol types: `Command` (client → daemon), `Response`
//! (daemon → client, one per command), and `Event` (daemon → subscribed
//! clients, unsolicited).
//!
//! Grounded on the teacher's `dictum-core/src/ipc/events.rs`: camelCase
//! struct fields, lowercase enum tags, and the round-trip-via-`serde_json::Value`
//! test idiom used there (`transcript_event_serializes_with_camel_case_and_lowercase_kind`
//! etc.) is reused below for `Command`/`Response`/`Event`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{EngineEvent, EngineStatus, Source};

/// The closed set of event tags a client may subscribe to (`spec.md` §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTag {
    Partial,
    Segment,
    Level,
    Status,
    Error,
    ModelProcessing,
    Topics,
}

impl EventTag {
    pub const ALL: [EventTag; 7] = [
        EventTag::Partial,
        EventTag::Segment,
        EventTag::Level,
        EventTag::Status,
        EventTag::Error,
        EventTag::ModelProcessing,
        EventTag::Topics,
    ];
}

/// Client → daemon command object. Unknown fields are ignored by serde's
/// default behavior; missing required fields fail at decode, which the
/// dispatcher turns into `Response::bad_command`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub cmd: CommandKind,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub system_audio: Option<bool>,
    #[serde(default)]
    pub events: Option<Vec<EventTag>>,
}

/// The closed command set (`spec.md` §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Status,
    Devices,
    Start,
    Stop,
    Subscribe,
}

/// Daemon → client response object. Exactly one is written per received
/// command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<EngineStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_audio: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn bad_command() -> Self {
        Self::err("bad command")
    }
}

/// Daemon → subscribed-client event object, unsolicited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event: EventTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mic: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sys: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transient: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_processing: Option<bool>,
}

impl Event {
    fn empty(tag: EventTag) -> Self {
        Self {
            event: tag,
            text: None,
            source: None,
            mic: None,
            sys: None,
            session_id: None,
            sequence_number: None,
            title: None,
            message: None,
            transient: None,
            recording: None,
            model_processing: None,
        }
    }

    pub fn tag(&self) -> EventTag {
        self.event
    }
}

/// Maps an internal `EngineEvent` to the wire `Event` shape, per the table
/// in `spec.md` §4.5.
pub fn from_engine_event(event: &EngineEvent) -> Event {
    match event {
        EngineEvent::PartialText { text, source } => Event {
            text: Some(text.clone()),
            source: Some(*source),
            ..Event::empty(EventTag::Partial)
        },
        EngineEvent::SegmentFinalized(segment) => Event {
            text: Some(segment.text.clone()),
            source: Some(segment.source),
            session_id: Some(segment.session_id),
            sequence_number: Some(segment.sequence_number),
            ..Event::empty(EventTag::Segment)
        },
        EngineEvent::Level { mic, sys } => Event {
            mic: Some(*mic),
            sys: Some(*sys),
            ..Event::empty(EventTag::Level)
        },
        EngineEvent::StatusChanged(status) => Event {
            recording: Some(*status == EngineStatus::Recording),
            ..Event::empty(EventTag::Status)
        },
        EngineEvent::Error { message, is_transient } => Event {
            message: Some(message.clone()),
            transient: Some(*is_transient),
            ..Event::empty(EventTag::Error)
        },
        EngineEvent::ModelProcessing(active) => Event {
            model_processing: Some(*active),
            ..Event::empty(EventTag::ModelProcessing)
        },
        EngineEvent::TopicsUpdated(topics) => Event {
            title: Some(
                topics
                    .iter()
                    .map(|t| t.title.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            ..Event::empty(EventTag::Topics)
        },
    }
}
