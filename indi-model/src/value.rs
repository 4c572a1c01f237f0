//! Element values detached from their element metadata
//!
//! A `Value` is what travels in updates and requests: the new content of one
//! element without its label, range or format.

use bytes::Bytes;

use crate::error::{ModelError, Result};
use crate::format::scan_number;
use crate::state::{PropertyKind, State, SwitchState};

/// Opaque binary payload with its format tag
///
/// `format` is a file-extension-like tag such as `.fits`. `compress` asks
/// the transport to deflate the payload in transit; it never changes the
/// bytes seen by either side.
#[derive(Debug, Clone, Default)]
pub struct Blob {
    pub format: String,
    pub data: Bytes,
    pub compress: bool,
}

impl Blob {
    pub fn new(format: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            format: format.into(),
            data: data.into(),
            compress: false,
        }
    }

    /// Request compression in transit
    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        // Transport hint is not part of the value
        self.format == other.format && self.data == other.data
    }
}

/// The value of a single element
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Number(f64),
    Switch(SwitchState),
    Light(State),
    Blob(Blob),
}

impl Value {
    pub fn kind(&self) -> PropertyKind {
        match self {
            Value::Text(_) => PropertyKind::Text,
            Value::Number(_) => PropertyKind::Number,
            Value::Switch(_) => PropertyKind::Switch,
            Value::Light(_) => PropertyKind::Light,
            Value::Blob(_) => PropertyKind::Blob,
        }
    }

    /// Parse the textual wire form of a value of the given kind
    ///
    /// Numbers accept decimal, sexagesimal and recognisably hexadecimal
    /// input. BLOBs have no plain text form and are decoded by the codec
    /// instead.
    pub fn parse(kind: PropertyKind, text: &str) -> Result<Self> {
        match kind {
            PropertyKind::Text => Ok(Value::Text(text.to_string())),
            PropertyKind::Number => scan_number(text).map(Value::Number),
            PropertyKind::Switch => text.parse().map(Value::Switch),
            PropertyKind::Light => text.parse().map(Value::Light),
            PropertyKind::Blob => Err(ModelError::InvalidValue {
                kind,
                value: text.to_string(),
            }),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_switch(&self) -> Option<SwitchState> {
        match self {
            Value::Switch(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_light(&self) -> Option<State> {
        match self {
            Value::Light(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<SwitchState> for Value {
    fn from(s: SwitchState) -> Self {
        Value::Switch(s)
    }
}

impl From<Blob> for Value {
    fn from(b: Blob) -> Self {
        Value::Blob(b)
    }
}
