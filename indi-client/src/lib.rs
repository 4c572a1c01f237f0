//! INDI Client
//!
//! Keeps a local mirror of the properties a server defines and tells you
//! when they change.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use indi_client::{Client, ClientConfig, MirrorEvent};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect("127.0.0.1:7624", ClientConfig::default()).await?;
//! client.wait_for_property("Thermostat", "TEMP", Duration::from_secs(5)).await?;
//!
//! client.on_element("Thermostat", "TEMP", "VALUE", |_event, property| {
//!     if let Some(property) = property {
//!         println!("TEMP = {:?}", property.value("VALUE"));
//!     }
//! });
//!
//! client.request("Thermostat", "TEMP").set("VALUE", 18.5).send().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Notification
//!
//! Every server message folds into the mirror first and is then announced,
//! in wire order and without coalescing, to:
//! - listeners registered with `on_event`, `on_device`, `on_property` or
//!   `on_element`, called synchronously on the receive loop
//! - the blocking [`ChangeIterator`] from [`Client::iter`]
//! - async subscribers from [`Client::subscribe`]

pub mod client;
pub mod error;
pub mod event;
pub mod iter;
pub mod listener;
pub mod mirror;
pub mod request;

pub use client::{Client, ClientConfig};
pub use error::{ClientError, Result};
pub use event::MirrorEvent;
pub use iter::{ChangeIterator, TimeoutIter, TryIter};
pub use listener::{Listener, ListenerId, ListenerScope, Listeners};
pub use mirror::{Change, Mirror};
pub use request::RequestBuilder;
