//! Error types for the driver crate

use std::io;

use indi_codec::CodecError;
use indi_connection::ConnectionError;
use indi_model::{ModelError, PropertyKey};
use thiserror::Error;

/// Errors surfaced to code that builds and runs a driver
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Property error: {0}")]
    Model(#[from] ModelError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Extension error: {0}")]
    Extension(#[from] ExtensionError),

    #[error("Config store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Device hook failed: {0}")]
    Hook(#[from] HandlerError),

    #[error("Property {0} is already registered")]
    AlreadyRegistered(PropertyKey),

    #[error("Unknown property: {0}")]
    UnknownProperty(PropertyKey),

    #[error("Device {0} is already hosted by this driver")]
    DeviceExists(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("The driver has shut down")]
    Shutdown,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Failure reported by a request handler or a lifecycle hook
///
/// Not exceptional: the property goes to Alert and the message is shown to
/// every client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ModelError> for HandlerError {
    fn from(err: ModelError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<DriverError> for HandlerError {
    fn from(err: DriverError) -> Self {
        Self::new(err.to_string())
    }
}

/// Misconfigured extensions, caught while the driver is being assembled
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("Extension {extension} would redefine {property}")]
    NameCollision {
        extension: String,
        property: PropertyKey,
    },

    #[error("Extension {extension} requires capability {capability}")]
    MissingCapability {
        extension: String,
        capability: String,
    },

    #[error("Extension {extension} renames unknown element {element} of {property}")]
    UnknownRename {
        extension: String,
        property: String,
        element: String,
    },

    #[error("Extension {extension}: {source}")]
    Property {
        extension: String,
        #[source]
        source: ModelError,
    },

    #[error("Extension {extension} could not register its properties: {reason}")]
    Registration { extension: String, reason: String },

    #[error("Unknown extension instance: {0}")]
    UnknownInstance(String),
}

/// Persisted configuration failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No configuration directory available on this platform")]
    NoConfigDir,
}

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, DriverError>;
