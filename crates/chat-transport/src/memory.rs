//! In-process transport for tests and demos.
//!
//! Routes streams between sessions created through clones of the same
//! `MemoryTransport`, over `tokio::io::duplex` pipes. Mirrors the router's
//! observable behavior: accepted streams begin with the dialing peer's
//! address line, session names cannot be reused, and revoked sessions fail
//! with `InvalidSessionId`. A `hang_session_create` switch makes
//! `create_session` block forever so callers can exercise their timeout
//! and name-regeneration paths.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::transport::{is_peer_address_valid, LocalIdentity, StreamPair, Transport};

const STREAM_BUFFER: usize = 256 * 1024;

struct MemorySession {
    address: String,
    accept_tx: mpsc::UnboundedSender<StreamPair>,
    accept_rx: Arc<Mutex<mpsc::UnboundedReceiver<StreamPair>>>,
    // Keeps the control stream open for as long as the session exists.
    _control: DuplexStream,
}

#[derive(Default)]
struct MemoryRouter {
    sessions: DashMap<String, MemorySession>,
    by_address: DashMap<String, String>,
    hang_session_create: AtomicBool,
}

/// Clonable in-memory transport; clones share one router.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    router: Arc<MemoryRouter>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, `create_session` never completes until unset again.
    pub fn hang_session_create(&self, hang: bool) {
        self.router
            .hang_session_create
            .store(hang, Ordering::Relaxed);
    }

    /// Forgets a session, as the router does when it expires one. Any
    /// parked or future accept on it fails with `InvalidSessionId`.
    pub fn revoke_session(&self, name: &str) {
        if let Some((_, session)) = self.router.sessions.remove(name) {
            self.router.by_address.remove(&session.address);
            debug!(session = name, "session revoked");
        }
    }

    /// Number of live sessions, for test assertions.
    pub fn session_count(&self) -> usize {
        self.router.sessions.len()
    }
}

fn split_pair(stream: DuplexStream) -> StreamPair {
    let (read, write) = tokio::io::split(stream);
    (Box::new(read), Box::new(write))
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn new_identity(&self, _endpoint: SocketAddr) -> Result<LocalIdentity> {
        let token = Uuid::new_v4().simple().to_string();
        Ok(LocalIdentity {
            key: format!("priv.{token}"),
            address: format!("{token}.mem.i2p"),
        })
    }

    async fn create_session(
        &self,
        name: &str,
        identity: &LocalIdentity,
        _endpoint: SocketAddr,
    ) -> Result<StreamPair> {
        if self.router.hang_session_create.load(Ordering::Relaxed) {
            // Simulates a router that never answers; the caller's timeout
            // fires and the name counts as burned.
            std::future::pending::<()>().await;
        }

        if self.router.sessions.contains_key(name) {
            return Err(Error::DuplicateSessionId);
        }

        let (local, router_end) = tokio::io::duplex(64);
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        self.router.sessions.insert(
            name.to_owned(),
            MemorySession {
                address: identity.address.clone(),
                accept_tx,
                accept_rx: Arc::new(Mutex::new(accept_rx)),
                _control: router_end,
            },
        );
        self.router
            .by_address
            .insert(identity.address.clone(), name.to_owned());

        debug!(session = name, address = %identity.address, "memory session created");
        Ok(split_pair(local))
    }

    async fn accept_stream(&self, session_name: &str, _endpoint: SocketAddr) -> Result<StreamPair> {
        let accept_rx = match self.router.sessions.get(session_name) {
            Some(session) => session.accept_rx.clone(),
            None => return Err(Error::InvalidSessionId),
        };

        // Parked until a peer dials in; a revoked session drops the sender
        // side and wakes us with None.
        let mut accept_rx = accept_rx.lock().await;
        match accept_rx.recv().await {
            Some(pair) => Ok(pair),
            None => Err(Error::InvalidSessionId),
        }
    }

    async fn connect_stream(
        &self,
        session_name: &str,
        peer_address: &str,
        _endpoint: SocketAddr,
    ) -> Result<StreamPair> {
        if !is_peer_address_valid(peer_address) {
            return Err(Error::InvalidPeerAddress(peer_address.to_owned()));
        }

        let own_address = match self.router.sessions.get(session_name) {
            Some(session) => session.address.clone(),
            None => return Err(Error::InvalidSessionId),
        };

        let target_name = match self.router.by_address.get(peer_address) {
            Some(name) => name.clone(),
            None => return Err(Error::PeerUnreachable),
        };

        let (connector_end, acceptor_end) = tokio::io::duplex(STREAM_BUFFER);

        // The router announces the dialing peer before any data.
        let mut connector_end = connector_end;
        connector_end
            .write_all(format!("{own_address}\n").as_bytes())
            .await
            .map_err(Error::SendFailed)?;

        let delivered = match self.router.sessions.get(&target_name) {
            Some(session) => session.accept_tx.send(split_pair(acceptor_end)).is_ok(),
            None => false,
        };
        if !delivered {
            return Err(Error::PeerUnreachable);
        }

        debug!(session = session_name, peer = peer_address, "memory stream connected");
        Ok(split_pair(connector_end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::FramedConnection;
    use crate::record::Record;
    use std::time::Duration;

    fn endpoint() -> SocketAddr {
        "127.0.0.1:7656".parse().unwrap()
    }

    async fn session(transport: &MemoryTransport, name: &str) -> LocalIdentity {
        let identity = transport.new_identity(endpoint()).await.unwrap();
        transport
            .create_session(name, &identity, endpoint())
            .await
            .unwrap();
        identity
    }

    #[tokio::test]
    async fn test_accept_and_connect_exchange_frames() {
        let transport = MemoryTransport::new();
        let alice = session(&transport, "alice").await;
        let _bob = session(&transport, "bob").await;

        let accept = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.accept_stream("alice", endpoint()).await })
        };

        let (r, w) = transport
            .connect_stream("bob", &alice.address, endpoint())
            .await
            .unwrap();
        let outgoing = FramedConnection::new(r, w);

        let (r, w) = accept.await.unwrap().unwrap();
        let incoming = FramedConnection::new(r, w);

        // Preamble carries the dialer's address.
        let bob_address = incoming.recv_line().await.unwrap().unwrap();
        assert!(bob_address.ends_with(".mem.i2p"));

        outgoing.send(&Record::Ping).await.unwrap();
        let value = incoming
            .recv(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value["type"], "ping");
    }

    #[tokio::test]
    async fn test_duplicate_session_name_rejected() {
        let transport = MemoryTransport::new();
        let identity = transport.new_identity(endpoint()).await.unwrap();
        transport
            .create_session("dup", &identity, endpoint())
            .await
            .unwrap();
        assert!(matches!(
            transport.create_session("dup", &identity, endpoint()).await,
            Err(Error::DuplicateSessionId)
        ));
    }

    #[tokio::test]
    async fn test_accept_on_unknown_session() {
        let transport = MemoryTransport::new();
        assert!(matches!(
            transport.accept_stream("ghost", endpoint()).await,
            Err(Error::InvalidSessionId)
        ));
    }

    #[tokio::test]
    async fn test_revoke_wakes_parked_accept() {
        let transport = MemoryTransport::new();
        session(&transport, "doomed").await;

        let accept = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.accept_stream("doomed", endpoint()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        transport.revoke_session("doomed");

        assert!(matches!(
            accept.await.unwrap(),
            Err(Error::InvalidSessionId)
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_modes() {
        let transport = MemoryTransport::new();
        session(&transport, "only").await;

        assert!(matches!(
            transport
                .connect_stream("only", "nobody.mem.i2p", endpoint())
                .await,
            Err(Error::PeerUnreachable)
        ));
        assert!(matches!(
            transport
                .connect_stream("only", "not-a-transport-address", endpoint())
                .await,
            Err(Error::InvalidPeerAddress(_))
        ));
        assert!(matches!(
            transport
                .connect_stream("ghost", "nobody.mem.i2p", endpoint())
                .await,
            Err(Error::InvalidSessionId)
        ));
    }

    #[tokio::test]
    async fn test_hang_switch_blocks_creation() {
        let transport = MemoryTransport::new();
        transport.hang_session_create(true);
        let identity = transport.new_identity(endpoint()).await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_millis(100),
            transport.create_session("slow", &identity, endpoint()),
        )
        .await;
        assert!(result.is_err(), "creation should hang");
        assert_eq!(transport.session_count(), 0);
    }
}
