//! Error types for the client crate

use std::time::Duration;

use indi_codec::CodecError;
use indi_connection::ConnectionError;
use indi_model::{ModelError, PropertyKey, PropertyKind};
use thiserror::Error;

/// Errors that can occur on the client side
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Property error: {0}")]
    Model(#[from] ModelError),

    #[error("Unknown property: {0}")]
    UnknownProperty(PropertyKey),

    #[error("Property {property} has no element {element}")]
    UnknownElement { property: PropertyKey, element: String },

    #[error("Property {0} is read-only")]
    ReadOnly(PropertyKey),

    #[error("Property {property} holds {expected} values, not {found}")]
    KindMismatch {
        property: PropertyKey,
        expected: PropertyKind,
        found: PropertyKind,
    },

    #[error("Request for {0} names no elements")]
    EmptyRequest(PropertyKey),

    #[error("The connection to the server is closed")]
    Closed,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
