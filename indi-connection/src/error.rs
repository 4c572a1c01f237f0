//! Error types for connections and sessions

use indi_codec::CodecError;
use thiserror::Error;

use crate::session::SessionId;

/// Errors raised by connections, sessions and the fan-out set
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Transport read or write failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The byte stream could not be framed or a message could not be encoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The peer or the session's writer is gone
    #[error("Connection closed")]
    Closed,

    /// The session's outbound queue is full; the peer is not keeping up
    #[error("Session {0} is not draining its outbound queue")]
    SlowConsumer(SessionId),

    /// No attached session has this id
    #[error("Unknown session {0}")]
    UnknownSession(SessionId),

    /// Invalid configuration values
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for connection operations
pub type Result<T> = std::result::Result<T, ConnectionError>;
