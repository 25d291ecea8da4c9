//! Two peers chatting over the in-memory transport.
//!
//! Run with: cargo run --example two_peers

use std::sync::Arc;

use veilchat::{
    ChatEngine, ChatEvent, EngineConfig, EventHub, MemoryTransport, SessionManager,
};

async fn engine(transport: &MemoryTransport) -> Arc<ChatEngine> {
    let manager = SessionManager::new();
    let session = manager.create_session(EventHub::default()).await;
    let engine = ChatEngine::new(
        Arc::new(transport.clone()),
        session,
        EngineConfig::default(),
    );
    engine
        .set_router_endpoint(Some("127.0.0.1".parse().unwrap()), Some(7656))
        .await;
    engine.start().await;
    engine
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let transport = MemoryTransport::new();
    let alice = engine(&transport).await;
    let bob = engine(&transport).await;

    // Wait for both identities, then introduce the peers to each other.
    let (alice_address, bob_address) = loop {
        if let (Some(a), Some(b)) = (alice.local_address().await, bob.local_address().await) {
            break (a, b);
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    };
    alice.set_peer_address(Some(bob_address)).await;
    bob.set_peer_address(Some(alice_address)).await;

    let mut bob_events = bob.subscribe();
    alice
        .enqueue_message(Some("hello from alice".into()), None)
        .await;

    while let Ok(event) = bob_events.recv().await {
        if matches!(event, ChatEvent::ConversationChanged) {
            for message in bob.messages().await {
                println!("[{:?}] {:?}", message.direction, message.text);
            }
            if !bob.messages().await.is_empty() {
                break;
            }
        }
    }

    alice.stop().await;
    bob.stop().await;
}
