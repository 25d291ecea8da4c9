use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the chat core.
///
/// Almost everything the core does is self-recovering: transport
/// rejections and broken connections feed retry loops and surface only as
/// status events. These variants exist for the duty loops to signal each
/// other and for the few public operations that can actually fail.
#[derive(Error, Debug)]
pub enum Error {
    /// No session is registered under this name
    #[error("Unknown session {0:?}")]
    UnknownSession(String),

    /// Transport or framing failure
    #[error(transparent)]
    Transport(#[from] veilchat_transport::Error),
}

impl Error {
    /// Returns true if the error means the data connection is gone and the
    /// delivery duties on it must stop.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_connection_broken(),
            Error::UnknownSession(_) => false,
        }
    }
}
