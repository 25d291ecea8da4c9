//! The engine: composition root and public API.
//!
//! `ChatEngine` ties one [`Session`] to one [`Transport`], owns the
//! conversation store and the liveness clock, and runs four background
//! loops: logical-session creation, inbound acceptance, outbound dialing
//! and peer-presence derivation. The embedding layer talks to it through
//! plain method calls in, and [`ChatEvent`]s out.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use veilchat_transport::{FramedConnection, LocalIdentity, Transport};

use crate::config::EngineConfig;
use crate::delivery::message_record;
use crate::events::ChatEvent;
use crate::session::Session;
use crate::store::{ConversationStore, MessagePayload, StoredMessage};

/// Runtime-mutable transport configuration.
///
/// Everything here arrives from the embedder (a settings form, in the
/// excluded layer) and may be missing or wrong at any time; the lifecycle
/// loops re-check it on every iteration.
#[derive(Debug, Clone, Default)]
pub struct EndpointSettings {
    /// Router control address.
    pub router_ip: Option<IpAddr>,
    /// Router control port.
    pub router_port: Option<u16>,
    /// The one peer this session talks to.
    pub peer_address: Option<String>,
}

impl EndpointSettings {
    pub(crate) fn endpoint(&self) -> Option<SocketAddr> {
        Some(SocketAddr::new(self.router_ip?, self.router_port?))
    }
}

pub struct ChatEngine {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) session: Arc<Session>,
    pub(crate) store: ConversationStore,
    pub(crate) config: EngineConfig,
    pub(crate) settings: RwLock<EndpointSettings>,
    pub(crate) identity: RwLock<Option<LocalIdentity>>,
    /// Millisecond timestamp of the last ping from the peer; 0 = never.
    last_ping_ms: AtomicI64,
    /// Critical section around logical-session creation, so concurrent
    /// recovery triggers cannot race to create two sessions.
    pub(crate) create_lock: Mutex<()>,
    /// Wakes the session loop after a teardown or a settings change.
    pub(crate) session_kick: Notify,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChatEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<Session>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            session,
            store: ConversationStore::new(),
            config,
            settings: RwLock::new(EndpointSettings::default()),
            identity: RwLock::new(None),
            last_ping_ms: AtomicI64::new(0),
            create_lock: Mutex::new(()),
            session_kick: Notify::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawns the background loops. Calling twice is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }
        let engine = self.clone();
        tasks.push(tokio::spawn(async move { engine.run_session_loop().await }));
        let engine = self.clone();
        tasks.push(tokio::spawn(async move { engine.run_accept_loop().await }));
        let engine = self.clone();
        tasks.push(tokio::spawn(async move { engine.run_connect_loop().await }));
        let engine = self.clone();
        tasks.push(tokio::spawn(async move { engine.run_presence_loop().await }));
    }

    /// Aborts the background loops and closes every connection.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        drop(tasks);
        self.session.shutdown().await;
    }

    /// The session this engine drives.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// New receiver for status and conversation notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.session.events().subscribe()
    }

    /// Reconfigures the router endpoint and pokes the session loop.
    pub async fn set_router_endpoint(&self, ip: Option<IpAddr>, port: Option<u16>) {
        {
            let mut settings = self.settings.write().await;
            settings.router_ip = ip;
            settings.router_port = port;
        }
        self.session_kick.notify_one();
    }

    /// Reconfigures the peer address. Whitespace is trimmed; an empty
    /// string counts as unset.
    pub async fn set_peer_address(&self, address: Option<String>) {
        let address = address
            .map(|a| a.trim().to_owned())
            .filter(|a| !a.is_empty());
        self.settings.write().await.peer_address = address;
    }

    /// Our own public address, once the transport has minted an identity.
    pub async fn local_address(&self) -> Option<String> {
        self.identity
            .read()
            .await
            .as_ref()
            .map(|i| i.address.clone())
    }

    /// Queues a chat message for delivery and returns its id.
    ///
    /// The message stays in the pending table, retransmitted every resend
    /// tick, until the peer acknowledges it. One frame is also sent
    /// immediately when a data connection is up. Returns `None` when the
    /// message has no content after normalization.
    pub async fn enqueue_message(
        &self,
        text: Option<String>,
        image_list: Option<Vec<String>>,
    ) -> Option<i64> {
        let payload = MessagePayload {
            text: text.map(|t| t.trim().to_owned()).filter(|t| !t.is_empty()),
            image_list: image_list.filter(|l| !l.is_empty()),
        };
        if payload.is_empty() {
            return None;
        }

        let id = self.store.enqueue_local(payload.clone()).await;
        self.session
            .events()
            .publish(ChatEvent::ConversationChanged);

        if self.session.control().await.is_some() {
            if let Some(connection) = self.preferred_connection().await {
                if let Err(e) = connection.send(&message_record(id, &payload)).await {
                    debug!(error = %e, id, "immediate send failed, retransmission will cover it");
                }
            }
        }

        Some(id)
    }

    /// All known messages, local and remote, in capture order.
    pub async fn messages(&self) -> Vec<StoredMessage> {
        self.store.messages().await
    }

    /// Ids of locally-sent messages not yet acknowledged.
    pub async fn pending_ids(&self) -> Vec<i64> {
        self.store.pending_ids().await
    }

    /// The connection acks and opportunistic sends go out on: incoming
    /// when present, else outgoing.
    pub(crate) async fn preferred_connection(&self) -> Option<Arc<FramedConnection>> {
        match self.session.incoming().await {
            Some(connection) => Some(connection),
            None => self.session.outgoing().await,
        }
    }

    pub(crate) fn record_peer_ping(&self) {
        self.last_ping_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Millisecond timestamp of the last ping from the peer.
    pub fn last_peer_ping_ms(&self) -> Option<i64> {
        match self.last_ping_ms.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }
}
