//! The logical session: one named channel over the transport.
//!
//! A session outlives any individual stream. It owns the control
//! connection that keeps the transport session alive, at most one incoming
//! and one outgoing data connection, and the per-direction status records
//! shown to the embedder. Status writes are suppressed when the text is
//! unchanged so fast-looping retry paths do not spam subscribers or logs.

use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use veilchat_transport::FramedConnection;

use crate::events::{ChatEvent, EventHub, StatusSeverity, StatusUpdate};

const STATUS_NOT_CREATED: &str = "not created";

fn generate_name() -> String {
    Uuid::new_v4().simple().to_string()
}

/// One logical session and its observable state.
pub struct Session {
    name: RwLock<String>,
    control: RwLock<Option<Arc<FramedConnection>>>,
    incoming: RwLock<Option<Arc<FramedConnection>>>,
    outgoing: RwLock<Option<Arc<FramedConnection>>>,
    session_status: RwLock<StatusUpdate>,
    incoming_status: RwLock<StatusUpdate>,
    outgoing_status: RwLock<StatusUpdate>,
    peer_status: RwLock<StatusUpdate>,
    ready_tx: watch::Sender<bool>,
    events: EventHub,
}

impl Session {
    pub fn new(events: EventHub) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            name: RwLock::new(generate_name()),
            control: RwLock::new(None),
            incoming: RwLock::new(None),
            outgoing: RwLock::new(None),
            session_status: RwLock::new(StatusUpdate::new(
                STATUS_NOT_CREATED,
                StatusSeverity::None,
            )),
            incoming_status: RwLock::new(StatusUpdate::new(
                STATUS_NOT_CREATED,
                StatusSeverity::None,
            )),
            outgoing_status: RwLock::new(StatusUpdate::new(
                STATUS_NOT_CREATED,
                StatusSeverity::None,
            )),
            peer_status: RwLock::new(StatusUpdate::new("", StatusSeverity::None)),
            ready_tx,
            events,
        }
    }

    /// The event hub this session publishes to.
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Current session name, the key under which the transport knows us.
    pub async fn name(&self) -> String {
        self.name.read().await.clone()
    }

    /// Replaces the name with a fresh random token. Used only after a
    /// session-creation timeout: the transport refuses to reuse a name
    /// whose creation timed out.
    pub async fn regenerate_name(&self) {
        let mut name = self.name.write().await;
        *name = generate_name();
        debug!(name = %name, "session name regenerated");
    }

    // Connection slots. Installing does not close the previous occupant;
    // callers close before replacing.

    pub async fn set_control(&self, connection: Option<Arc<FramedConnection>>) {
        *self.control.write().await = connection;
    }

    pub async fn control(&self) -> Option<Arc<FramedConnection>> {
        self.control.read().await.clone()
    }

    pub async fn set_incoming(&self, connection: Option<Arc<FramedConnection>>) {
        *self.incoming.write().await = connection;
    }

    pub async fn incoming(&self) -> Option<Arc<FramedConnection>> {
        self.incoming.read().await.clone()
    }

    pub async fn set_outgoing(&self, connection: Option<Arc<FramedConnection>>) {
        *self.outgoing.write().await = connection;
    }

    pub async fn outgoing(&self) -> Option<Arc<FramedConnection>> {
        self.outgoing.read().await.clone()
    }

    /// Closes and clears the control connection, and lowers the
    /// session-ready signal so the data loops block until the session is
    /// recreated. Idempotent.
    pub async fn close_control(&self) {
        if let Some(connection) = self.control.write().await.take() {
            connection.close().await;
        }
        self.ready_tx.send_replace(false);
    }

    /// Closes and clears the incoming data connection. Idempotent.
    pub async fn close_incoming(&self) {
        if let Some(connection) = self.incoming.write().await.take() {
            connection.close().await;
        }
    }

    /// Closes and clears the outgoing data connection. Idempotent.
    pub async fn close_outgoing(&self) {
        if let Some(connection) = self.outgoing.write().await.take() {
            connection.close().await;
        }
    }

    /// Closes every connection this session owns.
    pub async fn shutdown(&self) {
        self.close_incoming().await;
        self.close_outgoing().await;
        self.close_control().await;
    }

    /// Raises the session-ready signal, unblocking the data loops.
    pub fn mark_ready(&self) {
        self.ready_tx.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Waits until the logical session exists.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready_tx.subscribe();
        // The sender lives inside self, so this cannot fail.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    // Status records. Each update is suppressed when the text is identical
    // to the current one.

    pub async fn update_session_status(&self, text: &str, severity: StatusSeverity) {
        self.update_status(&self.session_status, "session", ChatEvent::SessionStatus, text, severity)
            .await;
    }

    pub async fn update_incoming_status(&self, text: &str, severity: StatusSeverity) {
        self.update_status(
            &self.incoming_status,
            "incoming",
            ChatEvent::IncomingStatus,
            text,
            severity,
        )
        .await;
    }

    pub async fn update_outgoing_status(&self, text: &str, severity: StatusSeverity) {
        self.update_status(
            &self.outgoing_status,
            "outgoing",
            ChatEvent::OutgoingStatus,
            text,
            severity,
        )
        .await;
    }

    pub async fn update_peer_status(&self, text: &str, severity: StatusSeverity) {
        self.update_status(&self.peer_status, "peer", ChatEvent::PeerStatus, text, severity)
            .await;
    }

    pub async fn session_status(&self) -> StatusUpdate {
        self.session_status.read().await.clone()
    }

    pub async fn incoming_status(&self) -> StatusUpdate {
        self.incoming_status.read().await.clone()
    }

    pub async fn outgoing_status(&self) -> StatusUpdate {
        self.outgoing_status.read().await.clone()
    }

    pub async fn peer_status(&self) -> StatusUpdate {
        self.peer_status.read().await.clone()
    }

    async fn update_status(
        &self,
        slot: &RwLock<StatusUpdate>,
        direction: &'static str,
        make_event: fn(StatusUpdate) -> ChatEvent,
        text: &str,
        severity: StatusSeverity,
    ) {
        let mut current = slot.write().await;
        if current.text == text {
            return;
        }
        info!(direction, status = text, "status updated");
        *current = StatusUpdate::new(text, severity);
        self.events.publish(make_event(current.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[tokio::test]
    async fn test_status_suppression() {
        let hub = EventHub::new(16);
        let session = Session::new(hub.clone());
        let mut rx = hub.subscribe();

        session
            .update_incoming_status("listening...", StatusSeverity::None)
            .await;
        session
            .update_incoming_status("listening...", StatusSeverity::None)
            .await;

        assert!(matches!(
            rx.try_recv().unwrap(),
            ChatEvent::IncomingStatus(StatusUpdate { ref text, .. }) if text == "listening..."
        ));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_status_change_fires_again() {
        let hub = EventHub::new(16);
        let session = Session::new(hub.clone());
        let mut rx = hub.subscribe();

        session
            .update_outgoing_status("connecting...", StatusSeverity::None)
            .await;
        session
            .update_outgoing_status("established", StatusSeverity::Success)
            .await;

        assert!(matches!(rx.try_recv().unwrap(), ChatEvent::OutgoingStatus(_)));
        assert!(matches!(rx.try_recv().unwrap(), ChatEvent::OutgoingStatus(_)));
        assert_eq!(session.outgoing_status().await.text, "established");
    }

    #[tokio::test]
    async fn test_regenerate_name_changes_the_name() {
        let session = Session::new(EventHub::default());
        let before = session.name().await;
        session.regenerate_name().await;
        assert_ne!(before, session.name().await);
    }

    #[tokio::test]
    async fn test_close_without_connection_is_a_noop() {
        let session = Session::new(EventHub::default());
        session.close_incoming().await;
        session.close_incoming().await;
        session.close_outgoing().await;
        assert!(session.incoming().await.is_none());
    }

    #[tokio::test]
    async fn test_ready_signal() {
        let session = Arc::new(Session::new(EventHub::default()));
        assert!(!session.is_ready());

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.wait_ready().await })
        };
        session.mark_ready();
        waiter.await.unwrap();
        assert!(session.is_ready());

        session.close_control().await;
        assert!(!session.is_ready());
    }
}
