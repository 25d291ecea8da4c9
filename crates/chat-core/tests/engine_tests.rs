//! End-to-end engine scenarios over the in-memory transport.
//!
//! Two engines share one in-process router and drive the full lifecycle:
//! session creation, both data connections, delivery, retransmission and
//! recovery. All intervals come from `EngineConfig::fast()`.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use veilchat_core::lifecycle::{
    STATUS_CREATED, STATUS_CREATING, STATUS_ESTABLISHED, STATUS_SESSION_GONE,
};
use veilchat_core::{ChatEngine, ChatEvent, EngineConfig, EventHub, SessionManager};
use veilchat_transport::MemoryTransport;

const DEADLINE: Duration = Duration::from_secs(5);

/// Polls a condition until it holds or the deadline passes.
macro_rules! wait_until {
    ($what:expr, $cond:expr) => {{
        let deadline = tokio::time::Instant::now() + DEADLINE;
        loop {
            if $cond {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("timed out waiting for {}", $what);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }};
}

fn router_ip() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

async fn new_engine(transport: &MemoryTransport) -> Arc<ChatEngine> {
    let manager = SessionManager::new();
    let session = manager.create_session(EventHub::default()).await;
    ChatEngine::new(Arc::new(transport.clone()), session, EngineConfig::fast())
}

/// Starts an engine and waits for its logical session.
async fn start_with_session(engine: &Arc<ChatEngine>) {
    engine
        .set_router_endpoint(Some(router_ip()), Some(7656))
        .await;
    engine.start().await;
    wait_until!(
        "session created",
        engine.session().session_status().await.text == STATUS_CREATED
    );
}

/// Wires two engines to each other and waits until both directions of
/// both engines are established.
async fn establish_pair(transport: &MemoryTransport) -> (Arc<ChatEngine>, Arc<ChatEngine>) {
    let alice = new_engine(transport).await;
    let bob = new_engine(transport).await;

    start_with_session(&alice).await;
    start_with_session(&bob).await;

    let alice_address = alice.local_address().await.expect("alice identity");
    let bob_address = bob.local_address().await.expect("bob identity");
    alice.set_peer_address(Some(bob_address)).await;
    bob.set_peer_address(Some(alice_address)).await;

    for (name, engine) in [("alice", &alice), ("bob", &bob)] {
        wait_until!(
            format!("{name} incoming established"),
            engine.session().incoming_status().await.text == STATUS_ESTABLISHED
        );
        wait_until!(
            format!("{name} outgoing established"),
            engine.session().outgoing_status().await.text == STATUS_ESTABLISHED
        );
    }

    (alice, bob)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_happy_path_message_delivery_and_ack() {
    let transport = MemoryTransport::new();
    let (alice, bob) = establish_pair(&transport).await;

    let id = alice
        .enqueue_message(Some("hello".into()), None)
        .await
        .expect("message accepted");
    assert_eq!(id, 0);
    assert_eq!(alice.pending_ids().await, vec![0]);

    // Bob sees the message exactly once.
    wait_until!(
        "bob received the message",
        bob.messages()
            .await
            .iter()
            .any(|m| m.text.as_deref() == Some("hello"))
    );

    // Bob's ack clears Alice's pending table.
    wait_until!("alice pending drained", alice.pending_ids().await.is_empty());

    // Retransmission plus dedup never double-delivers.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let delivered = bob
        .messages()
        .await
        .iter()
        .filter(|m| m.text.as_deref() == Some("hello"))
        .count();
    assert_eq!(delivered, 1);

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_messages_enqueued_before_connection_arrive_later() {
    let transport = MemoryTransport::new();
    let alice = new_engine(&transport).await;
    let bob = new_engine(&transport).await;

    // Nothing is connected yet; the message just sits in the pending
    // table.
    let id = alice
        .enqueue_message(Some("early".into()), None)
        .await
        .unwrap();
    assert_eq!(alice.pending_ids().await, vec![id]);

    start_with_session(&alice).await;
    start_with_session(&bob).await;
    let alice_address = alice.local_address().await.unwrap();
    let bob_address = bob.local_address().await.unwrap();
    alice.set_peer_address(Some(bob_address)).await;
    bob.set_peer_address(Some(alice_address)).await;

    // Retransmission delivers it once a connection exists.
    wait_until!(
        "bob received the early message",
        bob.messages()
            .await
            .iter()
            .any(|m| m.text.as_deref() == Some("early"))
    );
    wait_until!("alice pending drained", alice.pending_ids().await.is_empty());

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_session_timeout_regenerates_the_name() {
    let transport = MemoryTransport::new();
    transport.hang_session_create(true);

    let engine = new_engine(&transport).await;
    let first_name = engine.session().name().await;
    engine
        .set_router_endpoint(Some(router_ip()), Some(7656))
        .await;
    engine.start().await;

    // The creation attempt times out (200ms in the fast config) and burns
    // the name.
    wait_until!(
        "name regenerated",
        engine.session().name().await != first_name
    );

    // Once the router answers again, a later attempt succeeds — under a
    // name that is not the burned one.
    transport.hang_session_create(false);
    wait_until!(
        "session created after timeout",
        engine.session().session_status().await.text == STATUS_CREATED
    );
    assert_ne!(engine.session().name().await, first_name);

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_revoked_session_is_recreated() {
    let transport = MemoryTransport::new();
    let engine = new_engine(&transport).await;
    start_with_session(&engine).await;

    let mut events = engine.subscribe();
    let name = engine.session().name().await;
    transport.revoke_session(&name);

    // The parked accept fails with an invalid-session error, tears the
    // control connection down and triggers re-creation.
    let mut saw_session_gone = false;
    let mut saw_recreation = false;
    let deadline = tokio::time::Instant::now() + DEADLINE;
    while tokio::time::Instant::now() < deadline && !(saw_session_gone && saw_recreation) {
        match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
            Ok(Ok(ChatEvent::IncomingStatus(status))) if status.text == STATUS_SESSION_GONE => {
                saw_session_gone = true;
            }
            Ok(Ok(ChatEvent::SessionStatus(status))) if status.text == STATUS_CREATING => {
                saw_recreation = true;
            }
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => {}
        }
    }
    assert!(saw_session_gone, "accept loop should report the dead session");
    assert!(saw_recreation, "session loop should re-create the session");

    wait_until!("session recreated", engine.session().is_ready());

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_peer_presence_flips_online_then_offline() {
    let transport = MemoryTransport::new();
    let (alice, bob) = establish_pair(&transport).await;

    // Heartbeats flow, so Alice sees Bob online.
    wait_until!(
        "peer online",
        alice
            .session()
            .peer_status()
            .await
            .text
            .starts_with("online")
    );

    // Kill Bob entirely; after the staleness window Alice flips back.
    bob.stop().await;
    wait_until!(
        "peer offline",
        alice.session().peer_status().await.text == "offline"
    );

    alice.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_prerequisites_are_reported() {
    let transport = MemoryTransport::new();
    let engine = new_engine(&transport).await;
    engine.start().await;

    // No router endpoint configured: no identity can exist either, and
    // that is the first prerequisite checked.
    wait_until!(
        "missing prerequisite reported",
        engine
            .session()
            .session_status()
            .await
            .text
            .starts_with("cannot create without")
    );

    // Configuring the endpoint heals everything without a restart.
    engine
        .set_router_endpoint(Some(router_ip()), Some(7656))
        .await;
    wait_until!(
        "session created",
        engine.session().session_status().await.text == STATUS_CREATED
    );

    engine.stop().await;
}
