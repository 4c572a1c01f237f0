//! In-memory forms of the INDI message families
//!
//! One variant per intent. Definitions carry a whole [`Property`]; updates
//! and requests carry a list of [`OneValue`]s naming a subset of the
//! property's elements.

use std::fmt;
use std::str::FromStr;

use indi_model::{ModelError, NumberFormat, Property, PropertyKey, PropertyKind, State, Value};

use crate::timestamp::Timestamp;

/// Protocol version announced in `getProperties`
pub const PROTOCOL_VERSION: &str = "1.7";

/// A decoded or to-be-encoded INDI message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    GetProperties(GetProperties),
    Define(Definition),
    Set(ValueUpdate),
    New(NewValueRequest),
    Delete(Deletion),
    Message(Notice),
    EnableBlob(EnableBlob),
}

impl Message {
    /// Device the message concerns, when it names one
    pub fn device(&self) -> Option<&str> {
        match self {
            Message::GetProperties(m) => m.device.as_deref(),
            Message::Define(m) => Some(m.property.device()),
            Message::Set(m) => Some(&m.device),
            Message::New(m) => Some(&m.device),
            Message::Delete(m) => Some(&m.device),
            Message::Message(m) => m.device.as_deref(),
            Message::EnableBlob(m) => Some(&m.device),
        }
    }

    /// Wire tag of the message root
    pub fn tag(&self) -> String {
        match self {
            Message::GetProperties(_) => "getProperties".to_string(),
            Message::Define(m) => format!("def{}Vector", m.property.kind().tag_name()),
            Message::Set(m) => format!("set{}Vector", m.kind.tag_name()),
            Message::New(m) => format!("new{}Vector", m.kind.tag_name()),
            Message::Delete(_) => "delProperty".to_string(),
            Message::Message(_) => "message".to_string(),
            Message::EnableBlob(_) => "enableBLOB".to_string(),
        }
    }
}

/// Discovery request: ask for definitions of one property, one device or all
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetProperties {
    pub version: Option<String>,
    pub device: Option<String>,
    pub name: Option<String>,
}

impl GetProperties {
    pub fn all() -> Self {
        Self {
            version: Some(PROTOCOL_VERSION.to_string()),
            device: None,
            name: None,
        }
    }

    pub fn device(device: impl Into<String>) -> Self {
        Self {
            device: Some(device.into()),
            ..Self::all()
        }
    }

    pub fn property(device: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::device(device)
        }
    }
}

/// Full introduction of a property with its current values
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub property: Property,
    pub timestamp: Option<Timestamp>,
    pub message: Option<String>,
}

impl Definition {
    pub fn new(property: Property) -> Self {
        Self {
            property,
            timestamp: Some(Timestamp::now()),
            message: None,
        }
    }
}

/// New value for one element inside an update or request
#[derive(Debug, Clone, PartialEq)]
pub struct OneValue {
    pub name: String,
    pub value: Value,
    /// Format used to render a number; `%g` when absent
    pub format: Option<NumberFormat>,
}

impl OneValue {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            format: None,
        }
    }

    pub fn with_format(mut self, format: NumberFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// Values of the named elements taken from a property, in definition order
///
/// Numbers carry their element's format. `names = None` selects every
/// element.
pub fn values_of(property: &Property, names: Option<&[String]>) -> Vec<OneValue> {
    property
        .elements()
        .iter()
        .filter(|e| names.map_or(true, |n| n.iter().any(|n| n == e.name())))
        .map(|e| OneValue {
            name: e.name().to_string(),
            value: e.value(),
            format: e.number_spec().map(|spec| spec.format.clone()),
        })
        .collect()
}

/// Driver to client: new state and values for an already defined property
#[derive(Debug, Clone, PartialEq)]
pub struct ValueUpdate {
    pub device: String,
    pub name: String,
    pub kind: PropertyKind,
    pub state: Option<State>,
    pub timeout: Option<f64>,
    pub timestamp: Option<Timestamp>,
    pub message: Option<String>,
    pub values: Vec<OneValue>,
}

impl ValueUpdate {
    /// Snapshot of a property's state and the named element values
    pub fn from_property(property: &Property, names: Option<&[String]>) -> Self {
        Self {
            device: property.device().to_string(),
            name: property.name().to_string(),
            kind: property.kind(),
            state: Some(property.state()),
            timeout: (property.timeout() > 0.0).then_some(property.timeout()),
            timestamp: Some(Timestamp::now()),
            message: None,
            values: values_of(property, names),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn key(&self) -> PropertyKey {
        PropertyKey::new(&self.device, &self.name)
    }

    /// Whether the update carries binary payloads
    pub fn is_blob(&self) -> bool {
        self.kind == PropertyKind::Blob
    }
}

/// Client to driver: desired values for some elements of a property
#[derive(Debug, Clone, PartialEq)]
pub struct NewValueRequest {
    pub device: String,
    pub name: String,
    pub kind: PropertyKind,
    pub timestamp: Option<Timestamp>,
    pub values: Vec<OneValue>,
}

impl NewValueRequest {
    pub fn new(device: impl Into<String>, name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            device: device.into(),
            name: name.into(),
            kind,
            timestamp: Some(Timestamp::now()),
            values: Vec::new(),
        }
    }

    pub fn key(&self) -> PropertyKey {
        PropertyKey::new(&self.device, &self.name)
    }

    /// `(name, value)` pairs ready for [`Property::apply`]
    pub fn assignments(&self) -> Vec<(String, Value)> {
        self.values
            .iter()
            .map(|v| (v.name.clone(), v.value.clone()))
            .collect()
    }
}

/// Removal of one property, or of a whole device when `name` is absent
#[derive(Debug, Clone, PartialEq)]
pub struct Deletion {
    pub device: String,
    pub name: Option<String>,
    pub timestamp: Option<Timestamp>,
    pub message: Option<String>,
}

impl Deletion {
    pub fn property(device: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            name: Some(name.into()),
            timestamp: Some(Timestamp::now()),
            message: None,
        }
    }

    pub fn device(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            name: None,
            timestamp: Some(Timestamp::now()),
            message: None,
        }
    }
}

/// Free-text operator notice
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub device: Option<String>,
    pub timestamp: Option<Timestamp>,
    pub message: String,
}

impl Notice {
    pub fn new(device: Option<String>, message: impl Into<String>) -> Self {
        Self {
            device,
            timestamp: Some(Timestamp::now()),
            message: message.into(),
        }
    }
}

/// Whether BLOB updates are delivered on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlobPolicy {
    /// Only non-BLOB updates
    Never,
    /// Everything
    #[default]
    Also,
    /// Only BLOB updates
    Only,
}

impl BlobPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobPolicy::Never => "Never",
            BlobPolicy::Also => "Also",
            BlobPolicy::Only => "Only",
        }
    }

    /// Whether an update of the given kind passes this policy
    pub fn admits(&self, kind: PropertyKind) -> bool {
        match self {
            BlobPolicy::Never => kind != PropertyKind::Blob,
            BlobPolicy::Also => true,
            BlobPolicy::Only => kind == PropertyKind::Blob,
        }
    }
}

impl FromStr for BlobPolicy {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Never" => Ok(BlobPolicy::Never),
            "Also" => Ok(BlobPolicy::Also),
            "Only" => Ok(BlobPolicy::Only),
            other => Err(ModelError::UnknownToken {
                what: "BLOB policy",
                token: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for BlobPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client to driver: BLOB delivery policy for a device or one property
#[derive(Debug, Clone, PartialEq)]
pub struct EnableBlob {
    pub device: String,
    pub name: Option<String>,
    pub policy: BlobPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;
    use indi_model::{Element, NumberSpec, SwitchState};

    #[test]
    fn test_blob_policy_admits() {
        assert!(BlobPolicy::Also.admits(PropertyKind::Blob));
        assert!(BlobPolicy::Also.admits(PropertyKind::Number));
        assert!(!BlobPolicy::Never.admits(PropertyKind::Blob));
        assert!(BlobPolicy::Never.admits(PropertyKind::Text));
        assert!(BlobPolicy::Only.admits(PropertyKind::Blob));
        assert!(!BlobPolicy::Only.admits(PropertyKind::Switch));
        assert_eq!("Only".parse::<BlobPolicy>().unwrap(), BlobPolicy::Only);
        assert!("Sometimes".parse::<BlobPolicy>().is_err());
    }

    #[test]
    fn test_update_from_property_selects_subset() {
        let spec = NumberSpec::new(NumberFormat::parse("%.1f").unwrap(), 0.0, 0.0, 0.0);
        let property = Property::builder("Sim", "POS", PropertyKind::Number)
            .element(Element::number("X", 1.0, spec.clone()))
            .element(Element::number("Y", 2.0, spec))
            .build()
            .unwrap();

        let update = ValueUpdate::from_property(&property, Some(&["Y".to_string()][..]));
        assert_eq!(update.values.len(), 1);
        assert_eq!(update.values[0].name, "Y");
        assert_eq!(update.values[0].format.as_ref().unwrap().as_str(), "%.1f");
        assert_eq!(update.timeout, None);
        assert_eq!(Message::Set(update).tag(), "setNumberVector");
    }

    #[test]
    fn test_request_assignments() {
        let mut request = NewValueRequest::new("Sim", "MODE", PropertyKind::Switch);
        request.values.push(OneValue::new("B", SwitchState::On));
        assert_eq!(
            request.assignments(),
            vec![("B".to_string(), Value::Switch(SwitchState::On))]
        );
        assert_eq!(request.key().to_string(), "Sim.MODE");
    }
}
