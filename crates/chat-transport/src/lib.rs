//! Transport layer for veilchat.
//!
//! Provides the wire [`Record`] types and framing, the [`FramedConnection`]
//! that carries them over one transport stream, the [`Transport`] seam to
//! the anonymizing router, the [`SamTransport`] client for a real router,
//! and an in-process [`MemoryTransport`] for tests and demos.

pub mod connection;
pub mod error;
pub mod memory;
pub mod record;
pub mod sam;
pub mod transport;

pub use connection::{FramedConnection, DEFAULT_RECV_TIMEOUT};
pub use error::{Error, Result};
pub use memory::MemoryTransport;
pub use record::{trimmed_for_log, Record, RecordError, LOG_FIELD_LIMIT};
pub use sam::SamTransport;
pub use transport::{
    is_peer_address_valid, LocalIdentity, StreamPair, StreamReader, StreamWriter, Transport,
    ADDRESS_SUFFIX,
};
