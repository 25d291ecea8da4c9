//! The anonymizing-transport collaborator seam.
//!
//! The chat core only ever asks the transport for four things: mint a local
//! identity, create (and keep alive) a named session, accept one inbound
//! stream on a session, and dial one outbound stream to a peer. Everything
//! else — routing, tunnels, the anonymity layer itself — stays behind the
//! router this trait talks to.

use std::net::SocketAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Read half of a transport stream.
pub type StreamReader = Box<dyn AsyncRead + Send + Unpin>;
/// Write half of a transport stream.
pub type StreamWriter = Box<dyn AsyncWrite + Send + Unpin>;
/// One bidirectional transport stream, split.
pub type StreamPair = (StreamReader, StreamWriter);

/// Suffix every syntactically valid peer address carries.
pub const ADDRESS_SUFFIX: &str = ".i2p";

/// Returns true if the string looks like a peer address for this transport.
pub fn is_peer_address_valid(address: &str) -> bool {
    address.ends_with(ADDRESS_SUFFIX)
}

/// A local endpoint identity minted by the transport.
///
/// The private part never leaves this process; the address is the stable,
/// string-representable handle remote peers dial and declare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    /// Private handle, passed back to the transport to create sessions.
    pub key: String,
    /// Public address of this endpoint.
    pub address: String,
}

/// Point-to-point anonymizing transport.
///
/// `endpoint` is the router's control address; it is threaded through every
/// call because the embedder can reconfigure it at runtime.
///
/// Contract for accepted streams: the first `\n`-terminated line on an
/// accepted stream is the dialing peer's public address, written by the
/// router before any application data.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Mints a fresh local identity.
    async fn new_identity(&self, endpoint: SocketAddr) -> Result<LocalIdentity>;

    /// Creates the named logical session. The returned stream is the
    /// session's control connection: the session lives exactly as long as
    /// the stream stays open. The call itself is unbounded; callers apply
    /// their own timeout, and the transport rejects reuse of a name whose
    /// creation previously timed out.
    async fn create_session(
        &self,
        name: &str,
        identity: &LocalIdentity,
        endpoint: SocketAddr,
    ) -> Result<StreamPair>;

    /// Waits for one inbound stream on the session. Resolves when a peer
    /// has dialed us; fails with `InvalidSessionId` when the session is
    /// unknown or expired.
    async fn accept_stream(&self, session_name: &str, endpoint: SocketAddr) -> Result<StreamPair>;

    /// Dials one outbound stream to `peer_address` through the session.
    /// Fails with `PeerUnreachable`, `InvalidSessionId` or
    /// `InvalidPeerAddress`.
    async fn connect_stream(
        &self,
        session_name: &str,
        peer_address: &str,
        endpoint: SocketAddr,
    ) -> Result<StreamPair>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_address_suffix_check() {
        assert!(is_peer_address_valid("abcdef.b32.i2p"));
        assert!(!is_peer_address_valid("abcdef.b32.onion"));
        assert!(!is_peer_address_valid(""));
    }
}
