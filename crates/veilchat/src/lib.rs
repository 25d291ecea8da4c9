//! veilchat — peer-to-peer chat core over an anonymizing stream transport.
//!
//! One crate to depend on: re-exports the engine and session API from
//! `veilchat-core` and the wire and transport layer from
//! `veilchat-transport`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use veilchat::{ChatEngine, EngineConfig, EventHub, SamTransport, SessionManager};
//!
//! # async fn run() {
//! let manager = SessionManager::new();
//! let session = manager.create_session(EventHub::default()).await;
//! let engine = ChatEngine::new(Arc::new(SamTransport::new()), session, EngineConfig::default());
//!
//! engine
//!     .set_router_endpoint(Some("127.0.0.1".parse().unwrap()), Some(7656))
//!     .await;
//! engine.set_peer_address(Some("friend.b32.i2p".into())).await;
//! engine.start().await;
//!
//! let mut events = engine.subscribe();
//! engine.enqueue_message(Some("hello".into()), None).await;
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # }
//! ```

pub use veilchat_core::{
    ChatEngine, ChatEvent, ConversationStore, EndpointSettings, EngineConfig, EventHub,
    MessageDirection, MessagePayload, Session, SessionManager, StatusSeverity, StatusUpdate,
    StoredMessage,
};
pub use veilchat_transport::{
    is_peer_address_valid, FramedConnection, LocalIdentity, MemoryTransport, Record, SamTransport,
    Transport, ADDRESS_SUFFIX,
};
