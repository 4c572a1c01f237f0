//! # INDI SDK
//!
//! Build instrument drivers and clients that speak the INDI protocol.
//!
//! ```rust,no_run
//! use indi_sdk::driver::{Driver, DriverConfig, NoHardware};
//! use indi_sdk::logging::{init_logging, LoggingMode};
//! use indi_sdk::model::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! init_logging(LoggingMode::Development)?;
//!
//! let driver = Driver::new(DriverConfig::new("focuser"))?;
//! let device = driver.add_device("Focuser", NoHardware)?;
//! device.register(
//!     Property::builder("Focuser", "POSITION", PropertyKind::Number)
//!         .element(Element::number(
//!             "STEPS",
//!             0.0,
//!             NumberSpec::new(NumberFormat::parse("%6.0f")?, 0.0, 50000.0, 1.0),
//!         ))
//!         .build()?,
//! )?;
//!
//! driver.attach_stdio();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! indi-driver (registry, dispatch)      indi-client (mirror, listeners)
//!             \                             /
//!              indi-connection (sessions, fan-out)
//!                          |
//!              indi-codec (XML wire dialect)
//!                          |
//!              indi-model (properties, elements)
//! ```

pub mod logging;

pub use indi_client as client;
pub use indi_codec as codec;
pub use indi_connection as connection;
pub use indi_driver as driver;
pub use indi_model as model;

pub use indi_client::{Client, ClientConfig, ClientError, MirrorEvent};
pub use indi_driver::{Driver, DriverConfig, DriverError, HandlerError, PropertyHandle};
pub use indi_model::{Property, PropertyKey, PropertyKind, State, Value};
pub use logging::{init_logging, LoggingError, LoggingMode};
