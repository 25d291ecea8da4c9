use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for transport and framing operations
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to reach the router's control endpoint
    #[error("Failed to connect to router at {0}: {1}")]
    RouterConnectFailed(SocketAddr, io::Error),

    /// The router rejected our greeting
    #[error("Router handshake failed: {0}")]
    HandshakeFailed(String),

    /// The session name is unknown to (or expired on) the transport
    #[error("Session id is not known to the transport")]
    InvalidSessionId,

    /// The session name is already taken on the transport
    #[error("Session id is already in use on the transport")]
    DuplicateSessionId,

    /// The remote peer could not be reached through the transport
    #[error("Peer is unreachable")]
    PeerUnreachable,

    /// The peer address was rejected by the transport
    #[error("Peer address rejected by the transport: {0}")]
    InvalidPeerAddress(String),

    /// Failed to send a frame
    #[error("Failed to send frame: {0}")]
    SendFailed(io::Error),

    /// Failed to receive a frame
    #[error("Failed to receive frame: {0}")]
    ReceiveFailed(io::Error),

    /// The connection was closed locally
    #[error("Connection closed")]
    ConnectionClosed,

    /// The stream ended in the middle of a frame
    #[error("Stream ended inside a frame")]
    StreamClosed,

    /// A bounded read did not complete in time
    #[error("Read timed out")]
    Timeout,

    /// Declared frame length exceeds the acceptable maximum
    #[error("Frame too large ({0} bytes)")]
    FrameTooLarge(usize),

    /// The frame payload was not a decodable record
    #[error("Failed to parse record: {0}")]
    ParseError(String),

    /// The router replied with something we cannot interpret
    #[error("Unexpected reply from the router: {0}")]
    ProtocolError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl Error {
    /// Returns true if the error means the connection is gone and every
    /// duty on it must stop.
    pub fn is_connection_broken(&self) -> bool {
        matches!(
            self,
            Error::ConnectionClosed
                | Error::StreamClosed
                | Error::Timeout
                | Error::SendFailed(_)
                | Error::ReceiveFailed(_)
                | Error::IoError(_)
        )
    }

    /// Returns true if the error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// Returns true if retrying the same operation might succeed
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::InvalidPeerAddress(_) | Error::FrameTooLarge(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categorization() {
        assert!(Error::ConnectionClosed.is_connection_broken());
        assert!(Error::StreamClosed.is_connection_broken());
        assert!(Error::Timeout.is_connection_broken());
        assert!(Error::Timeout.is_timeout());

        assert!(!Error::InvalidSessionId.is_connection_broken());
        assert!(!Error::PeerUnreachable.is_connection_broken());
        assert!(!Error::ParseError("bad".into()).is_connection_broken());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::PeerUnreachable.is_recoverable());
        assert!(Error::InvalidSessionId.is_recoverable());
        assert!(!Error::InvalidPeerAddress("x".into()).is_recoverable());
    }
}
