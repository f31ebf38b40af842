//! Error types for the tunnel data path.

use thiserror::Error;

use crate::proxy::tcp::ConnectError;

/// Result type alias for peerproxy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while relaying, pooling or rewriting.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unexpected message from the peer
    #[error("invalid message format: {0}")]
    InvalidMessage(String),

    /// Handshake named a command other than TCP_CONNECT
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    /// SDP candidate line did not match the expected grammar
    #[error("invalid candidate line: {0}")]
    Candidate(String),

    /// Target address rejected by the non-unicast policy
    #[error("address not allowed: {0}")]
    NotAllowed(String),

    /// Outbound TCP connection failed
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),

    /// Send attempted on a pool channel that is not open
    #[error("channel {0} is not open")]
    ChannelNotOpen(String),

    /// Open attempted on a pool channel that is already open
    #[error("channel {0} is already open")]
    ChannelAlreadyOpen(String),

    /// Underlying channel closed
    #[error("channel {0} closed")]
    ChannelClosed(String),

    /// Transport connection could not be established or was lost
    #[error("transport error: {0}")]
    Transport(String),

    /// `start` called twice on the same component
    #[error("already started")]
    AlreadyStarted,

    /// Component was stopped before the operation finished
    #[error("stopped")]
    Stopped,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Network I/O error
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),
}

impl Error {
    /// Create a new invalid message error
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Error::InvalidMessage(msg.into())
    }

    /// Create a new candidate grammar error
    pub fn candidate(msg: impl Into<String>) -> Self {
        Error::Candidate(msg.into())
    }

    /// Create a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Check if this error was caused by the peer breaking protocol
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::InvalidMessage(_) | Error::UnsupportedCommand(_) | Error::Candidate(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidMessage(e.to_string())
    }
}
