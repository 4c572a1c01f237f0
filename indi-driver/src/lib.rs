//! INDI Driver
//!
//! The device side of the protocol: a registry of properties that clients
//! can discover, watch and change.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use indi_driver::{Driver, DriverConfig, NoHardware};
//! use indi_model::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = Driver::new(DriverConfig::new("thermostat"))?;
//! let device = driver.add_device("Thermostat", NoHardware)?;
//!
//! let spec = NumberSpec::new(NumberFormat::parse("%6.2f")?, -50.0, 50.0, 0.5);
//! let temp = device.define(
//!     Property::builder("Thermostat", "TEMP", PropertyKind::Number)
//!         .element(Element::number("VALUE", 20.0, spec))
//!         .build()?,
//! )?;
//! temp.on_request(|ctx| {
//!     ctx.apply()?;
//!     ctx.set_state(State::Busy);
//!     ctx.publish(Some("heating"));
//!     Ok(())
//! });
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:7624").await?;
//! driver.serve(listener).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Dispatch
//!
//! Each property has its own queue. Requests are validated (permission,
//! element names, number ranges, switch rules) before the handler sees
//! them; a rejected request leaves the values untouched and publishes the
//! property in Alert with the reason. Requests for different properties run
//! concurrently; requests for one property run one after another.

pub mod config;
pub mod device;
pub mod error;
pub mod extension;
pub mod handler;
pub mod registry;
pub mod store;

pub use config::{default_config_path, DriverConfig};
pub use device::{DeviceDriver, DeviceHandle, ExtensionId, NoHardware, CONNECT, CONNECTION, DISCONNECT};
pub use error::{DriverError, ExtensionError, HandlerError, Result, StoreError};
pub use extension::{
    Capabilities, Capability, Extension, ExtensionBuilder, Gate, Naming, Requirement,
    TemplateExtension,
};
pub use handler::{RequestHandler, UpdateContext};
pub use registry::{Driver, PropertyHandle};
pub use store::{stored_values, ConfigStore, JsonFileConfigStore, MemoryConfigStore, StoredValues};
