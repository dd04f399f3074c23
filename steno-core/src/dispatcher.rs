//! Command Dispatcher (C8): decodes a [`Command`](crate::wire::Command),
//! drives the engine or broadcaster, and produces exactly one
//! [`Response`](crate::wire::Response).
//!
//! Grounded on the teacher's `dictum-app/src/commands.rs`: one function per
//! command, each reading engine state or calling a single engine method and
//! translating the `Result` into the IPC response shape. Generalized here
//! from Tauri's `#[tauri::command]` + `State<T>` extractor into a plain
//! `dispatch` method the socket server calls directly.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::broadcaster::{ClientId, EventBroadcaster};
use crate::collaborators::AudioSourceFactory;
use crate::engine::RecordingEngine;
use crate::wire::{Command, CommandKind, EventTag, Response};

/// A dispatched command's outcome: the response line to write back, plus —
/// for `subscribe` only — the receiving half of this client's new event
/// channel, which the caller (the socket server's connection handler) must
/// start forwarding to its writer task.
pub struct DispatchOutcome {
    pub response: Response,
    pub new_subscription: Option<mpsc::Receiver<String>>,
}

impl From<Response> for DispatchOutcome {
    fn from(response: Response) -> Self {
        Self {
            response,
            new_subscription: None,
        }
    }
}

pub struct CommandDispatcher {
    engine: Arc<RecordingEngine>,
    broadcaster: EventBroadcaster,
    audio_factory: Arc<dyn AudioSourceFactory>,
}

impl CommandDispatcher {
    pub fn new(
        engine: Arc<RecordingEngine>,
        broadcaster: EventBroadcaster,
        audio_factory: Arc<dyn AudioSourceFactory>,
    ) -> Self {
        Self {
            engine,
            broadcaster,
            audio_factory,
        }
    }

    /// Handles one decoded command for `client`. Never fails: every error
    /// path is translated into `Response{ok:false, error:...}`.
    pub async fn dispatch(&self, client: ClientId, command: Command) -> DispatchOutcome {
        match command.cmd {
            CommandKind::Status => self.handle_status().await.into(),
            CommandKind::Devices => self.handle_devices().into(),
            CommandKind::Start => self.handle_start(command).await.into(),
            CommandKind::Stop => self.handle_stop().await.into(),
            CommandKind::Subscribe => self.handle_subscribe(client, command),
        }
    }

    async fn handle_status(&self) -> Response {
        let snapshot = self.engine.snapshot().await;
        Response {
            ok: true,
            recording: Some(snapshot.status == crate::domain::EngineStatus::Recording),
            session_id: snapshot.session.map(|s| s.id),
            device: snapshot.device,
            system_audio: Some(snapshot.system_audio_enabled),
            status: Some(snapshot.status),
            segments: Some(snapshot.segment_count),
            ..Response::default()
        }
    }

    fn handle_devices(&self) -> Response {
        Response {
            ok: true,
            devices: Some(self.audio_factory.list_devices()),
            ..Response::default()
        }
    }

    async fn handle_start(&self, command: Command) -> Response {
        let locale = command.locale.unwrap_or_else(|| "en-US".to_string());
        let system_audio = command.system_audio.unwrap_or(false);
        match self
            .engine
            .start(&locale, command.device, system_audio)
            .await
        {
            Ok(session) => Response {
                ok: true,
                session_id: Some(session.id),
                ..Response::default()
            },
            Err(e) => Response::err(e.to_string()),
        }
    }

    async fn handle_stop(&self) -> Response {
        self.engine.stop().await;
        Response::ok()
    }

    fn handle_subscribe(&self, client: ClientId, command: Command) -> DispatchOutcome {
        let tags = command.events.unwrap_or_else(|| EventTag::ALL.to_vec());
        let receiver = self.broadcaster.subscribe(client, tags);
        DispatchOutcome {
            response: Response::ok(),
            new_subscription: Some(receiver),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::CommandKind;

    fn bad_command_response() -> Response {
        Response::bad_command()
    }

    #[test]
    fn bad_command_response_has_expected_shape() {
        let response = bad_command_response();
        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some("bad command"));
    }

    #[test]
    fn command_kind_round_trips_through_json() {
        let json = serde_json::json!({"cmd": "subscribe", "events": ["segment", "status"]});
        let command: Command = serde_json::from_value(json).unwrap();
        assert_eq!(command.cmd, CommandKind::Subscribe);
        assert_eq!(command.events.unwrap().len(), 2);
    }
}
