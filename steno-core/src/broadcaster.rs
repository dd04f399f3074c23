//! Event Broadcaster (C7): fans engine events out to subscribed clients.
//!
//! The teacher's `dictum-core` never needed per-receiver failure detection —
//! its one `tauri::AppHandle::emit` sink can't be "slow" or "gone" the way a
//! socket client can. `tokio::sync::broadcast` has the same gap: a lagging
//! receiver gets `Lagged`, not silent eviction, and there is no way to tag a
//! subscription with a per-client event-tag filter. So this module keeps the
//! teacher's `Arc<Mutex<HashMap<...>>>` registry shape (as in
//! `dictum-core/src/engine/mod.rs`'s client bookkeeping) but backs each
//! subscriber with its own bounded `mpsc::Sender`, written to with a
//! non-blocking `try_send` and dropped on first failure — satisfying
//! `spec.md` §4.5's "never block the engine, never suspend on a slow
//! client" delivery contract.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::EngineEvent;
use crate::wire::{self, EventTag};

pub type ClientId = Uuid;

/// Outbound channel capacity per subscriber. Generous enough to absorb a
/// burst of partials/levels without blocking the engine; a client that
/// can't keep draining this is considered slow and is evicted.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

struct Subscription {
    tags: Vec<EventTag>,
    sender: mpsc::Sender<String>,
}

/// Registry of active client subscriptions. Cheaply cloneable; intended to
/// be shared between the socket server's per-connection tasks and the
/// engine's event-emission path.
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    subscribers: Arc<Mutex<HashMap<ClientId, Subscription>>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `client` for the given event tags, returning the receiving
    /// half of its outbound channel. A later call for the same `client`
    /// replaces its tag set and sender.
    pub fn subscribe(&self, client: ClientId, tags: Vec<EventTag>) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.subscribers
            .lock()
            .insert(client, Subscription { tags, sender: tx });
        rx
    }

    pub fn unsubscribe(&self, client: ClientId) {
        self.subscribers.lock().remove(&client);
    }

    /// Called by the Recording Engine (and Coordinator, for `topics`) on
    /// every emitted event. Delivery is single-attempt and non-blocking per
    /// subscriber; subscribers whose channel is full or closed are dropped
    /// from the registry on the spot.
    pub fn publish(&self, event: &EngineEvent) {
        let wire_event = wire::from_engine_event(event);
        let tag = wire_event.tag();
        let payload = match serde_json::to_string(&wire_event) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode event for broadcast");
                return;
            }
        };

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|_, sub| {
            if !sub.tags.contains(&tag) {
                return true;
            }
            match sub.sender.try_send(payload.clone()) {
                Ok(()) => true,
                Err(_) => false,
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EngineStatus, Source};

    #[tokio::test]
    async fn subscriber_receives_only_matching_tags() {
        let broadcaster = EventBroadcaster::new();
        let client = Uuid::new_v4();
        let mut rx = broadcaster.subscribe(client, vec![EventTag::Status]);

        broadcaster.publish(&EngineEvent::PartialText {
            text: "hi".into(),
            source: Source::Microphone,
        });
        broadcaster.publish(&EngineEvent::StatusChanged(EngineStatus::Recording));

        let received = rx.recv().await.expect("expected one event");
        assert!(received.contains("\"status\""));
        assert!(
            rx.try_recv().is_err(),
            "unsubscribed tag must not be delivered"
        );
    }

    #[tokio::test]
    async fn slow_client_is_evicted_without_blocking_publish() {
        let broadcaster = EventBroadcaster::new();
        let client = Uuid::new_v4();
        let _rx = broadcaster.subscribe(client, vec![EventTag::Level]);

        for _ in 0..(SUBSCRIBER_CHANNEL_CAPACITY + 10) {
            broadcaster.publish(&EngineEvent::Level { mic: 0.1, sys: 0.2 });
        }

        assert_eq!(
            broadcaster.subscriber_count(),
            0,
            "subscriber with a full channel must be evicted"
        );
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let broadcaster = EventBroadcaster::new();
        let client = Uuid::new_v4();
        let mut rx = broadcaster.subscribe(client, vec![EventTag::Error]);
        broadcaster.unsubscribe(client);

        broadcaster.publish(&EngineEvent::Error {
            message: "boom".into(),
            is_transient: true,
        });

        assert!(rx.try_recv().is_err());
    }
}
