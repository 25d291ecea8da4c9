//! Peer presence derived from the liveness clock.
//!
//! Once a second, turn "when did we last hear a ping" into a display
//! status: never heard one or heard one too long ago means offline,
//! anything fresher shows as online with the elapsed time.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::sleep;

use crate::engine::ChatEngine;
use crate::events::StatusSeverity;

pub const STATUS_OFFLINE: &str = "offline";

impl ChatEngine {
    /// Recomputes the peer status forever. Status suppression in the
    /// session keeps identical consecutive texts from reaching
    /// subscribers.
    pub(crate) async fn run_presence_loop(self: Arc<Self>) {
        loop {
            let (text, severity) = self.peer_presence();
            self.session.update_peer_status(&text, severity).await;
            sleep(self.config.presence_interval).await;
        }
    }

    /// The current presence verdict.
    pub fn peer_presence(&self) -> (String, StatusSeverity) {
        let Some(last_ping_ms) = self.last_peer_ping_ms() else {
            return (STATUS_OFFLINE.to_owned(), StatusSeverity::Error);
        };

        let elapsed_ms = (Utc::now().timestamp_millis() - last_ping_ms).max(0);
        if elapsed_ms as u128 >= self.config.peer_staleness.as_millis() {
            return (STATUS_OFFLINE.to_owned(), StatusSeverity::Error);
        }

        if elapsed_ms < 1000 {
            (format!("online ({elapsed_ms} ms)"), StatusSeverity::Success)
        } else {
            (
                format!("online ({} s)", elapsed_ms / 1000),
                StatusSeverity::Success,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::events::EventHub;
    use crate::session::Session;
    use veilchat_transport::MemoryTransport;

    fn engine() -> Arc<ChatEngine> {
        let session = Arc::new(Session::new(EventHub::default()));
        ChatEngine::new(
            Arc::new(MemoryTransport::new()),
            session,
            EngineConfig::fast(),
        )
    }

    #[tokio::test]
    async fn test_no_ping_means_offline() {
        let engine = engine();
        let (text, severity) = engine.peer_presence();
        assert_eq!(text, STATUS_OFFLINE);
        assert_eq!(severity, StatusSeverity::Error);
    }

    #[tokio::test]
    async fn test_fresh_ping_means_online_in_ms() {
        let engine = engine();
        engine.record_peer_ping();
        let (text, severity) = engine.peer_presence();
        assert!(text.starts_with("online ("), "got {text:?}");
        assert!(text.ends_with("ms)"), "got {text:?}");
        assert_eq!(severity, StatusSeverity::Success);
    }

    #[tokio::test]
    async fn test_stale_ping_flips_back_to_offline() {
        let engine = engine();
        engine.record_peer_ping();

        // peer_staleness is 300ms in the fast config.
        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        let (text, severity) = engine.peer_presence();
        assert_eq!(text, STATUS_OFFLINE);
        assert_eq!(severity, StatusSeverity::Error);
    }
}
