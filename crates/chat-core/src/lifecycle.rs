//! Session lifecycle: creation, acceptance, dialing.
//!
//! Three indefinitely-looping duties. The session loop creates the logical
//! session against the transport (inside a critical section, with a
//! creation timeout that burns the name); the accept and connect loops
//! each drive one data connection and hand live connections to the
//! delivery engine. Every failure mode ends in a status update, a fixed
//! backoff and another iteration — nothing here is fatal.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use veilchat_transport::{
    is_peer_address_valid, Error as TransportError, FramedConnection, LocalIdentity,
};

use crate::engine::ChatEngine;
use crate::events::StatusSeverity;

pub const STATUS_NO_IDENTITY: &str = "cannot create without a local identity";
pub const STATUS_NO_ADDRESS: &str = "cannot create without a transport address";
pub const STATUS_NO_PORT: &str = "cannot create without a transport port";
pub const STATUS_CREATING: &str = "creating...";
pub const STATUS_TIMED_OUT: &str = "timed out";
pub const STATUS_CREATE_FAILED: &str = "session creation failed";
pub const STATUS_CREATED: &str = "created";
pub const STATUS_LISTENING: &str = "listening...";
pub const STATUS_CONNECTING: &str = "connecting...";
pub const STATUS_ESTABLISHED: &str = "established";
pub const STATUS_ABORTED: &str = "aborted";
pub const STATUS_SESSION_GONE: &str = "error: session no longer exists";
pub const STATUS_NO_PEER: &str = "cannot create without a peer address";
pub const STATUS_PEER_INVALID: &str = "peer address is not valid";
pub const STATUS_PEER_MISMATCH: &str = "connected peer does not match the configured peer address";
pub const STATUS_PEER_UNREACHABLE: &str = "could not reach the peer";
pub const STATUS_PEER_REJECTED: &str = "error: peer address rejected by the transport";

impl ChatEngine {
    /// Drives logical-session creation forever. After a successful
    /// creation it parks until something kicks it — a teardown from one of
    /// the data loops, or a settings change.
    pub(crate) async fn run_session_loop(self: Arc<Self>) {
        loop {
            if self.ensure_session().await {
                self.session_kick.notified().await;
            } else {
                sleep(self.config.retry_backoff).await;
            }
        }
    }

    /// Creates the logical session unless it already exists.
    ///
    /// The whole body sits inside the creation critical section: two
    /// triggers (say, an accept-side "session invalid" and a connect-side
    /// one) must not race to create two sessions. Returns true when a
    /// session exists on exit.
    pub(crate) async fn ensure_session(&self) -> bool {
        let _guard = self.create_lock.lock().await;
        if self.session.control().await.is_some() {
            return true;
        }

        let settings = self.settings.read().await.clone();

        // Identity first; mint one lazily once the router is reachable.
        let identity = match self.identity.read().await.clone() {
            Some(identity) => Some(identity),
            None => match settings.endpoint() {
                Some(endpoint) => self.ensure_local_identity(endpoint).await,
                None => None,
            },
        };
        let Some(identity) = identity else {
            self.missing_session_prerequisite(STATUS_NO_IDENTITY).await;
            return false;
        };
        let Some(ip) = settings.router_ip else {
            self.missing_session_prerequisite(STATUS_NO_ADDRESS).await;
            return false;
        };
        let Some(port) = settings.router_port else {
            self.missing_session_prerequisite(STATUS_NO_PORT).await;
            return false;
        };
        let endpoint = SocketAddr::new(ip, port);

        loop {
            self.session
                .update_session_status(STATUS_CREATING, StatusSeverity::None)
                .await;
            let name = self.session.name().await;

            match timeout(
                self.config.session_create_timeout,
                self.transport.create_session(&name, &identity, endpoint),
            )
            .await
            {
                Err(_elapsed) => {
                    // The transport will reject this name from now on.
                    self.session.regenerate_name().await;
                    self.session
                        .update_session_status(STATUS_TIMED_OUT, StatusSeverity::Error)
                        .await;
                    sleep(self.config.retry_backoff).await;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, session = %name, "session creation failed");
                    self.session
                        .update_session_status(STATUS_CREATE_FAILED, StatusSeverity::Error)
                        .await;
                    sleep(self.config.retry_backoff).await;
                }
                Ok(Ok((reader, writer))) => {
                    self.session
                        .set_control(Some(Arc::new(FramedConnection::new(reader, writer))))
                        .await;
                    self.session
                        .update_session_status(STATUS_CREATED, StatusSeverity::Success)
                        .await;
                    info!(session = %name, "logical session created");
                    self.session.mark_ready();
                    return true;
                }
            }
        }
    }

    async fn missing_session_prerequisite(&self, status: &str) {
        self.session.close_incoming().await;
        self.session.close_control().await;
        self.session
            .update_session_status(status, StatusSeverity::Error)
            .await;
    }

    async fn ensure_local_identity(&self, endpoint: SocketAddr) -> Option<LocalIdentity> {
        match self.transport.new_identity(endpoint).await {
            Ok(identity) => {
                info!(address = %identity.address, "local identity created");
                *self.identity.write().await = Some(identity.clone());
                Some(identity)
            }
            Err(e) => {
                warn!(error = %e, "could not create a local identity");
                None
            }
        }
    }

    /// Accepts one inbound data connection at a time, forever.
    pub(crate) async fn run_accept_loop(self: Arc<Self>) {
        loop {
            self.session.wait_ready().await;

            let settings = self.settings.read().await.clone();
            let Some(endpoint) = settings.endpoint() else {
                let status = if settings.router_ip.is_none() {
                    STATUS_NO_ADDRESS
                } else {
                    STATUS_NO_PORT
                };
                self.session
                    .update_incoming_status(status, StatusSeverity::Error)
                    .await;
                sleep(self.config.retry_backoff).await;
                continue;
            };

            let name = self.session.name().await;
            self.session
                .update_incoming_status(STATUS_LISTENING, StatusSeverity::None)
                .await;

            let connection = match self.transport.accept_stream(&name, endpoint).await {
                Ok((reader, writer)) => Arc::new(FramedConnection::new(reader, writer)),
                Err(TransportError::InvalidSessionId) => {
                    self.session
                        .update_incoming_status(STATUS_SESSION_GONE, StatusSeverity::Error)
                        .await;
                    self.session.close_control().await;
                    self.session.close_incoming().await;
                    self.session_kick.notify_one();
                    sleep(self.config.retry_backoff).await;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    self.session
                        .update_incoming_status(STATUS_ABORTED, StatusSeverity::Error)
                        .await;
                    sleep(self.config.retry_backoff).await;
                    continue;
                }
            };

            self.session.set_incoming(Some(connection.clone())).await;

            // The router announces the dialing peer on the first line.
            let declared = match connection.recv_line().await {
                Ok(Some(line)) => line,
                Ok(None) | Err(_) => {
                    self.abort_incoming().await;
                    continue;
                }
            };
            info!(peer = %declared, "inbound peer connected");

            // Validate against the peer address configured right now, not
            // the one from before we started waiting.
            let expected = self.settings.read().await.peer_address.clone();
            let rejection = match expected {
                None => Some(STATUS_NO_PEER),
                Some(ref expected) if !is_peer_address_valid(expected) => {
                    Some(STATUS_PEER_INVALID)
                }
                Some(ref expected) if *expected != declared => Some(STATUS_PEER_MISMATCH),
                Some(_) => None,
            };
            if let Some(status) = rejection {
                self.session
                    .update_incoming_status(status, StatusSeverity::Error)
                    .await;
                self.session.close_incoming().await;
                sleep(self.config.retry_backoff).await;
                continue;
            }

            self.session
                .update_incoming_status(STATUS_ESTABLISHED, StatusSeverity::Success)
                .await;

            if let Err(e) = self.run_delivery(connection).await {
                debug!(error = %e, "incoming delivery ended");
            }
            self.abort_incoming().await;
        }
    }

    async fn abort_incoming(&self) {
        self.session.close_incoming().await;
        self.session
            .update_incoming_status(STATUS_ABORTED, StatusSeverity::Error)
            .await;
        sleep(self.config.retry_backoff).await;
    }

    /// Dials one outbound data connection at a time, forever.
    pub(crate) async fn run_connect_loop(self: Arc<Self>) {
        loop {
            self.session.wait_ready().await;

            let settings = self.settings.read().await.clone();
            let Some(endpoint) = settings.endpoint() else {
                let status = if settings.router_ip.is_none() {
                    STATUS_NO_ADDRESS
                } else {
                    STATUS_NO_PORT
                };
                self.session
                    .update_outgoing_status(status, StatusSeverity::Error)
                    .await;
                sleep(self.config.retry_backoff).await;
                continue;
            };
            let Some(peer_address) = settings.peer_address else {
                self.session
                    .update_outgoing_status(STATUS_NO_PEER, StatusSeverity::Error)
                    .await;
                sleep(self.config.retry_backoff).await;
                continue;
            };
            if !is_peer_address_valid(&peer_address) {
                self.session
                    .update_outgoing_status(STATUS_PEER_INVALID, StatusSeverity::Error)
                    .await;
                sleep(self.config.retry_backoff).await;
                continue;
            }

            self.session
                .update_outgoing_status(STATUS_CONNECTING, StatusSeverity::None)
                .await;
            let name = self.session.name().await;

            let connection = match self
                .transport
                .connect_stream(&name, &peer_address, endpoint)
                .await
            {
                Ok((reader, writer)) => Arc::new(FramedConnection::new(reader, writer)),
                Err(TransportError::PeerUnreachable) => {
                    // The session stays alive; the peer may come up later.
                    self.session
                        .update_outgoing_status(STATUS_PEER_UNREACHABLE, StatusSeverity::Error)
                        .await;
                    sleep(self.config.retry_backoff).await;
                    continue;
                }
                Err(TransportError::InvalidSessionId) => {
                    self.session
                        .update_outgoing_status(STATUS_SESSION_GONE, StatusSeverity::Error)
                        .await;
                    self.session.close_control().await;
                    self.session_kick.notify_one();
                    sleep(self.config.retry_backoff).await;
                    continue;
                }
                Err(TransportError::InvalidPeerAddress(_)) => {
                    self.session
                        .update_outgoing_status(STATUS_PEER_REJECTED, StatusSeverity::Error)
                        .await;
                    sleep(self.config.retry_backoff).await;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "connect failed");
                    self.session
                        .update_outgoing_status(STATUS_ABORTED, StatusSeverity::Error)
                        .await;
                    sleep(self.config.retry_backoff).await;
                    continue;
                }
            };

            self.session.set_outgoing(Some(connection.clone())).await;
            self.session
                .update_outgoing_status(STATUS_ESTABLISHED, StatusSeverity::Success)
                .await;
            info!(peer = %peer_address, "connected to peer");

            if let Err(e) = self.run_delivery(connection).await {
                debug!(error = %e, "outgoing delivery ended");
            }
            self.session.close_outgoing().await;
            self.session
                .update_outgoing_status(STATUS_ABORTED, StatusSeverity::Error)
                .await;
            sleep(self.config.retry_backoff).await;
        }
    }
}
