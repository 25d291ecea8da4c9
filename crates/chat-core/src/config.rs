//! Engine tuning knobs.

use std::time::Duration;

use veilchat_transport::DEFAULT_RECV_TIMEOUT;

/// Protocol intervals and timeouts.
///
/// The defaults are the production values; tests shrink them to keep
/// scenarios fast.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cadence of outbound `ping` records per live connection.
    pub heartbeat_interval: Duration,
    /// Cadence of pending-message retransmission. One fixed interval, no
    /// backoff, no retry cap: a message is resent every tick until acked.
    pub resend_interval: Duration,
    /// Backoff between retries of the session / accept / connect loops.
    pub retry_backoff: Duration,
    /// Bound on one logical-session creation attempt; on expiry the
    /// session name is regenerated because the transport refuses reuse.
    pub session_create_timeout: Duration,
    /// Bound on each read step of a framed connection.
    pub recv_timeout: Duration,
    /// Without a ping for this long the peer counts as offline.
    pub peer_staleness: Duration,
    /// Cadence of the peer-presence status recomputation.
    pub presence_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            resend_interval: Duration::from_secs(2),
            retry_backoff: Duration::from_secs(1),
            session_create_timeout: Duration::from_secs(60),
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            peer_staleness: Duration::from_secs(15),
            presence_interval: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    /// Uniformly shrunk intervals for tests.
    pub fn fast() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(50),
            resend_interval: Duration::from_millis(40),
            retry_backoff: Duration::from_millis(20),
            session_create_timeout: Duration::from_millis(200),
            recv_timeout: Duration::from_secs(2),
            peer_staleness: Duration::from_millis(300),
            presence_interval: Duration::from_millis(25),
        }
    }
}
