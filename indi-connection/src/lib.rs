//! INDI Connections
//!
//! Duplex message streams and the driver-side bookkeeping around them.
//!
//! - [`Connection`]: a [`MessageReader`] and [`MessageWriter`] over any
//!   tokio byte stream (TCP, or an in-memory pair for tests)
//! - [`Session`]: one attached peer with its device scope, BLOB policy and
//!   bounded outbound queue
//! - [`Fanout`]: encode-once broadcast to every accepting session, dropping
//!   peers that fall behind or disconnect

pub mod config;
pub mod error;
pub mod fanout;
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use error::{ConnectionError, Result};
pub use fanout::Fanout;
pub use session::{DeviceScope, Session, SessionId};
pub use transport::{Connection, MessageReader, MessageWriter};
