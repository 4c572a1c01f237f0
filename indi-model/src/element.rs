//! Elements: the named leaves of a property
//!
//! The five element kinds are one closed enum. Kind-specific metadata (the
//! range and format of a number) lives inside the variant, so a value can
//! never be paired with metadata of another kind.

use crate::error::{ModelError, Result};
use crate::format::NumberFormat;
use crate::state::{PropertyKind, State, SwitchState};
use crate::value::{Blob, Value};

/// Range, step and display format of a number element
///
/// A `max` of zero means there is no upper bound; `min` still applies
/// unless it is zero as well. Otherwise the range is enforced when
/// `min < max`, and an inverted range is not enforced at all. `step` is
/// advisory.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberSpec {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub format: NumberFormat,
}

impl NumberSpec {
    pub fn new(format: NumberFormat, min: f64, max: f64, step: f64) -> Self {
        Self {
            min,
            max,
            step,
            format,
        }
    }

    /// An unbounded number rendered with `%g`
    pub fn unbounded() -> Self {
        Self::new(NumberFormat::default(), 0.0, 0.0, 0.0)
    }

    /// Smallest accepted value, if any
    pub fn lower_bound(&self) -> Option<f64> {
        if self.max == 0.0 {
            (self.min != 0.0).then_some(self.min)
        } else {
            (self.min < self.max).then_some(self.min)
        }
    }

    /// Largest accepted value, if any
    pub fn upper_bound(&self) -> Option<f64> {
        (self.max != 0.0 && self.min < self.max).then_some(self.max)
    }

    pub fn is_bounded(&self) -> bool {
        self.lower_bound().is_some() || self.upper_bound().is_some()
    }

    /// Reject values outside the declared range
    pub fn check(&self, element: &str, value: f64) -> Result<()> {
        let below = self.lower_bound().is_some_and(|min| value < min);
        let above = self.upper_bound().is_some_and(|max| value > max);
        if value.is_nan() || below || above {
            return Err(ModelError::OutOfRange {
                element: element.to_string(),
                value,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

impl Default for NumberSpec {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Kind-specific content of an element
#[derive(Debug, Clone, PartialEq)]
pub enum ElementData {
    Text(String),
    Number { value: f64, spec: NumberSpec },
    Switch(SwitchState),
    Light(State),
    Blob(Blob),
}

impl ElementData {
    pub fn kind(&self) -> PropertyKind {
        match self {
            ElementData::Text(_) => PropertyKind::Text,
            ElementData::Number { .. } => PropertyKind::Number,
            ElementData::Switch(_) => PropertyKind::Switch,
            ElementData::Light(_) => PropertyKind::Light,
            ElementData::Blob(_) => PropertyKind::Blob,
        }
    }
}

/// A named value inside a property
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    name: String,
    label: String,
    data: ElementData,
}

impl Element {
    pub fn new(name: impl Into<String>, data: ElementData) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            data,
        }
    }

    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, ElementData::Text(value.into()))
    }

    pub fn number(name: impl Into<String>, value: f64, spec: NumberSpec) -> Self {
        Self::new(name, ElementData::Number { value, spec })
    }

    pub fn switch(name: impl Into<String>, state: SwitchState) -> Self {
        Self::new(name, ElementData::Switch(state))
    }

    pub fn light(name: impl Into<String>, state: State) -> Self {
        Self::new(name, ElementData::Light(state))
    }

    /// An empty BLOB element
    pub fn blob(name: impl Into<String>) -> Self {
        Self::new(name, ElementData::Blob(Blob::default()))
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// The same element under another name; the label follows when it was
    /// still the default
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if self.label == self.name {
            self.label = name.clone();
        }
        self.name = name;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> PropertyKind {
        self.data.kind()
    }

    pub fn data(&self) -> &ElementData {
        &self.data
    }

    pub fn number_spec(&self) -> Option<&NumberSpec> {
        match &self.data {
            ElementData::Number { spec, .. } => Some(spec),
            _ => None,
        }
    }

    /// Current value without metadata
    pub fn value(&self) -> Value {
        match &self.data {
            ElementData::Text(s) => Value::Text(s.clone()),
            ElementData::Number { value, .. } => Value::Number(*value),
            ElementData::Switch(s) => Value::Switch(*s),
            ElementData::Light(s) => Value::Light(*s),
            ElementData::Blob(b) => Value::Blob(b.clone()),
        }
    }

    /// Textual wire form of the current value
    ///
    /// Numbers are rendered with the element's format. BLOBs have no text
    /// form and yield an empty string.
    /// Read text in this element's wire form, the inverse of
    /// [`Element::text_value`]
    pub fn parse_text(&self, text: &str) -> Result<Value> {
        match &self.data {
            ElementData::Number { spec, .. } => spec.format.parse_value(text).map(Value::Number),
            data => Value::parse(data.kind(), text),
        }
    }

    pub fn text_value(&self) -> String {
        match &self.data {
            ElementData::Text(s) => s.clone(),
            ElementData::Number { value, spec } => spec.format.format(*value),
            ElementData::Switch(s) => s.as_str().to_string(),
            ElementData::Light(s) => s.as_str().to_string(),
            ElementData::Blob(_) => String::new(),
        }
    }

    /// Validate a candidate value without applying it
    pub fn check(&self, value: &Value) -> Result<()> {
        match (&self.data, value) {
            (ElementData::Number { spec, .. }, Value::Number(n)) => spec.check(&self.name, *n),
            (data, value) if data.kind() == value.kind() => Ok(()),
            (data, value) => Err(ModelError::KindMismatch {
                property: self.name.clone(),
                expected: data.kind(),
                found: value.kind(),
            }),
        }
    }

    /// Validate and store a new value, returning whether it changed
    pub fn set(&mut self, value: Value) -> Result<bool> {
        self.check(&value)?;
        self.replace(value)
    }

    /// Store a new value checking only its kind
    ///
    /// Used by mirrors, which take the owning side's values as given.
    pub fn replace(&mut self, value: Value) -> Result<bool> {
        if self.kind() != value.kind() {
            return Err(ModelError::KindMismatch {
                property: self.name.clone(),
                expected: self.kind(),
                found: value.kind(),
            });
        }
        let changed = self.value() != value;
        match (&mut self.data, value) {
            (ElementData::Text(s), Value::Text(v)) => *s = v,
            (ElementData::Number { value, .. }, Value::Number(v)) => *value = v,
            (ElementData::Switch(s), Value::Switch(v)) => *s = v,
            (ElementData::Light(s), Value::Light(v)) => *s = v,
            (ElementData::Blob(b), Value::Blob(v)) => *b = v,
            // kinds were matched above
            _ => {}
        }
        Ok(changed)
    }
}
