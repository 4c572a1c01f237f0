//! Error types for the property model

use thiserror::Error;

use crate::state::{PropertyKind, SwitchRule};

/// Errors raised while building or mutating properties
///
/// These are validation failures: they are reported back to whoever
/// attempted the change and never tear down a session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    /// Two elements of one property share a name
    #[error("Duplicate element '{element}' in property '{property}'")]
    DuplicateElement { property: String, element: String },

    /// An element of the wrong kind was added or assigned
    #[error("Kind mismatch in '{property}': expected {expected}, found {found}")]
    KindMismatch {
        property: String,
        expected: PropertyKind,
        found: PropertyKind,
    },

    /// A value names an element the property does not have
    #[error("Unknown element '{element}' in property '{property}'")]
    UnknownElement { property: String, element: String },

    /// The property has been broadcast and its element set is frozen
    #[error("Property '{0}' has been defined; its elements can no longer change")]
    Frozen(String),

    /// A number lies outside the element's declared range
    #[error("Value {value} for '{element}' is outside [{min}, {max}]")]
    OutOfRange {
        element: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// A switch request violates the property's selection rule
    #[error("Switch rule {rule} violated in '{property}': {reason}")]
    SwitchRule {
        property: String,
        rule: SwitchRule,
        reason: String,
    },

    /// A textual value could not be parsed for its kind
    #[error("Invalid {kind} value '{value}'")]
    InvalidValue { kind: PropertyKind, value: String },

    /// An enumerated token (state, permission, rule, switch) was not recognised
    #[error("Unknown {what} token '{token}'")]
    UnknownToken { what: &'static str, token: String },

    /// A printf-style number format could not be interpreted
    #[error("Invalid number format '{0}'")]
    InvalidFormat(String),

    /// The switch rule was set on a property that is not a switch vector
    #[error("Property '{0}' is not a switch vector and cannot carry a rule")]
    RuleOnNonSwitch(String),
}

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ModelError::UnknownElement {
            property: "TEMP".to_string(),
            element: "X".to_string(),
        };
        assert_eq!(error.to_string(), "Unknown element 'X' in property 'TEMP'");

        let error = ModelError::OutOfRange {
            element: "TEMP".to_string(),
            value: 80.0,
            min: -50.0,
            max: 50.0,
        };
        assert!(error.to_string().contains("outside [-50, 50]"));

        let error = ModelError::SwitchRule {
            property: "MODE".to_string(),
            rule: SwitchRule::OneOfMany,
            reason: "no element left on".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Switch rule OneOfMany violated in 'MODE': no element left on"
        );
    }
}
