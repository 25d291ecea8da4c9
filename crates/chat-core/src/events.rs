//! Notifications to the embedding layer.
//!
//! The presentation layer subscribes to one broadcast channel and renders
//! whatever arrives: the latest status per direction, and a conversation
//! redraw hint. Nothing else crosses the boundary.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Display hint attached to a status text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSeverity {
    None,
    Info,
    Error,
    Success,
}

/// One status record: human-readable text plus its severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub text: String,
    pub severity: StatusSeverity,
}

impl StatusUpdate {
    pub fn new(text: impl Into<String>, severity: StatusSeverity) -> Self {
        Self {
            text: text.into(),
            severity,
        }
    }
}

/// Everything the core ever tells the embedder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatEvent {
    /// Logical-session status changed
    SessionStatus(StatusUpdate),
    /// Incoming data connection status changed
    IncomingStatus(StatusUpdate),
    /// Outgoing data connection status changed
    OutgoingStatus(StatusUpdate),
    /// Peer presence derived from the liveness clock changed
    PeerStatus(StatusUpdate),
    /// A message was sent, acknowledged or received
    ConversationChanged,
}

/// Broadcast hub for [`ChatEvent`]s.
///
/// Cheap to clone; publishing with no live subscribers is a no-op, and
/// slow subscribers lag rather than block the core.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<ChatEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Creates a new receiver for the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.tx.subscribe()
    }

    /// Publishes one event to all current subscribers.
    pub fn publish(&self, event: ChatEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_a_noop() {
        let hub = EventHub::new(8);
        hub.publish(ChatEvent::ConversationChanged);
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_the_event() {
        let hub = EventHub::new(8);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        hub.publish(ChatEvent::PeerStatus(StatusUpdate::new(
            "offline",
            StatusSeverity::Error,
        )));

        assert!(matches!(
            first.recv().await.unwrap(),
            ChatEvent::PeerStatus(_)
        ));
        assert!(matches!(
            second.recv().await.unwrap(),
            ChatEvent::PeerStatus(_)
        ));
    }
}
