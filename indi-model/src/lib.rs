//! INDI Property Model
//!
//! Typed representation of the device properties exchanged between INDI
//! drivers and clients.
//!
//! # Overview
//!
//! - **Elements**: the five leaf kinds (text, number, switch, light, BLOB)
//!   with kind-specific metadata carried inside one closed enum
//! - **Properties**: ordered, named vectors of same-kind elements sharing a
//!   device, permission, state and display group
//! - **Switch rules**: one-of-many, at-most-one and any-of-many groups,
//!   enforced by rejecting violating requests
//! - **Number formats**: printf-style specs plus the sexagesimal `%m`
//!   conversion, in both directions
//!
//! # Quick Start
//!
//! ```rust
//! use indi_model::{Element, NumberFormat, NumberSpec, Property, PropertyKind, Value};
//!
//! let spec = NumberSpec::new(NumberFormat::parse("%6.2f").unwrap(), -50.0, 50.0, 0.1);
//! let mut temp = Property::builder("Thermostat", "TEMP", PropertyKind::Number)
//!     .label("Temperature")
//!     .element(Element::number("VALUE", 20.0, spec))
//!     .build()
//!     .unwrap();
//!
//! let changed = temp.apply([("VALUE", Value::Number(18.5))]).unwrap();
//! assert_eq!(changed, vec!["VALUE".to_string()]);
//! assert_eq!(temp.element("VALUE").unwrap().text_value(), " 18.50");
//!
//! // Out-of-range values are rejected, never clamped
//! assert!(temp.apply([("VALUE", Value::Number(80.0))]).is_err());
//! ```

pub mod element;
pub mod error;
pub mod format;
pub mod property;
pub mod state;
pub mod switch;
pub mod value;

pub use element::{Element, ElementData, NumberSpec};
pub use error::{ModelError, Result};
pub use format::{format_sexagesimal, scan_hex, scan_number, scan_sexagesimal, NumberFormat};
pub use property::{Property, PropertyBuilder, PropertyKey};
pub use state::{Permission, PropertyKind, State, SwitchRule, SwitchState};
pub use value::{Blob, Value};

/// Common imports for code working with properties
pub mod prelude {
    pub use crate::{
        Blob, Element, NumberFormat, NumberSpec, Permission, Property, PropertyKey, PropertyKind,
        State, SwitchRule, SwitchState, Value,
    };
}
