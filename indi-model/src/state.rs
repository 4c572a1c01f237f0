//! Enumerations shared by properties and elements
//!
//! Every enum here has a single canonical wire token, exposed through
//! `as_str()` and accepted back by `FromStr`. Parsing trims surrounding
//! whitespace and is otherwise exact.

use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

// ============================================================================
// State
// ============================================================================

/// Lifecycle state carried by properties and by light elements
///
/// The engine enforces no transition table. By convention `Idle` means
/// inactive, `Ok` means the last action succeeded, `Busy` means an action is
/// in progress and `Alert` means the last action failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    #[default]
    Idle,
    Ok,
    Busy,
    Alert,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Idle => "Idle",
            State::Ok => "Ok",
            State::Busy => "Busy",
            State::Alert => "Alert",
        }
    }
}

impl FromStr for State {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Idle" => Ok(State::Idle),
            "Ok" => Ok(State::Ok),
            "Busy" => Ok(State::Busy),
            "Alert" => Ok(State::Alert),
            other => Err(ModelError::UnknownToken {
                what: "state",
                token: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Permission
// ============================================================================

/// Which side may write a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Permission {
    ReadOnly,
    WriteOnly,
    #[default]
    ReadWrite,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ReadOnly => "ro",
            Permission::WriteOnly => "wo",
            Permission::ReadWrite => "rw",
        }
    }

    /// Whether clients may send new-value requests for the property
    pub fn accepts_requests(&self) -> bool {
        !matches!(self, Permission::ReadOnly)
    }
}

impl FromStr for Permission {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ro" => Ok(Permission::ReadOnly),
            "wo" => Ok(Permission::WriteOnly),
            "rw" => Ok(Permission::ReadWrite),
            other => Err(ModelError::UnknownToken {
                what: "permission",
                token: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Switch rule and switch state
// ============================================================================

/// How many switches of one property may be on at the same time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SwitchRule {
    /// Exactly one element on
    #[default]
    OneOfMany,
    /// Zero or one element on
    AtMostOne,
    /// Any combination
    AnyOfMany,
}

impl SwitchRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchRule::OneOfMany => "OneOfMany",
            SwitchRule::AtMostOne => "AtMostOne",
            SwitchRule::AnyOfMany => "AnyOfMany",
        }
    }
}

impl FromStr for SwitchRule {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "OneOfMany" => Ok(SwitchRule::OneOfMany),
            "AtMostOne" => Ok(SwitchRule::AtMostOne),
            "AnyOfMany" => Ok(SwitchRule::AnyOfMany),
            other => Err(ModelError::UnknownToken {
                what: "switch rule",
                token: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for SwitchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On/off status of a single switch element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SwitchState {
    On,
    #[default]
    Off,
}

impl SwitchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchState::On => "On",
            SwitchState::Off => "Off",
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, SwitchState::On)
    }
}

impl From<bool> for SwitchState {
    fn from(on: bool) -> Self {
        if on {
            SwitchState::On
        } else {
            SwitchState::Off
        }
    }
}

impl FromStr for SwitchState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "On" => Ok(SwitchState::On),
            "Off" => Ok(SwitchState::Off),
            other => Err(ModelError::UnknownToken {
                what: "switch",
                token: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PropertyKind
// ============================================================================

/// The five element kinds a property vector can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Text,
    Number,
    Switch,
    Light,
    Blob,
}

impl PropertyKind {
    /// Kind name as it appears inside wire tags (`defBLOBVector`, `oneText`, ...)
    pub fn tag_name(&self) -> &'static str {
        match self {
            PropertyKind::Text => "Text",
            PropertyKind::Number => "Number",
            PropertyKind::Switch => "Switch",
            PropertyKind::Light => "Light",
            PropertyKind::Blob => "BLOB",
        }
    }

    /// Resolve a kind from the infix of a wire tag
    pub fn from_tag_name(name: &str) -> Option<Self> {
        match name {
            "Text" => Some(PropertyKind::Text),
            "Number" => Some(PropertyKind::Number),
            "Switch" => Some(PropertyKind::Switch),
            "Light" => Some(PropertyKind::Light),
            "BLOB" => Some(PropertyKind::Blob),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Idle", State::Idle)]
    #[case("Ok", State::Ok)]
    #[case(" Busy ", State::Busy)]
    #[case("Alert", State::Alert)]
    fn test_state_tokens(#[case] token: &str, #[case] expected: State) {
        assert_eq!(token.parse::<State>().unwrap(), expected);
        assert_eq!(expected.as_str(), token.trim());
    }

    #[test]
    fn test_unknown_state_token() {
        let err = "Broken".parse::<State>().unwrap_err();
        assert_eq!(
            err,
            ModelError::UnknownToken {
                what: "state",
                token: "Broken".to_string()
            }
        );
    }

    #[rstest]
    #[case("ro", Permission::ReadOnly, false)]
    #[case("wo", Permission::WriteOnly, true)]
    #[case("rw", Permission::ReadWrite, true)]
    fn test_permission_tokens(
        #[case] token: &str,
        #[case] expected: Permission,
        #[case] writable: bool,
    ) {
        let perm: Permission = token.parse().unwrap();
        assert_eq!(perm, expected);
        assert_eq!(perm.accepts_requests(), writable);
        assert_eq!(perm.to_string(), token);
    }

    #[test]
    fn test_switch_tokens() {
        assert_eq!("On".parse::<SwitchState>().unwrap(), SwitchState::On);
        assert_eq!("Off".parse::<SwitchState>().unwrap(), SwitchState::Off);
        assert!("on".parse::<SwitchState>().is_err());
        assert_eq!(SwitchState::from(true), SwitchState::On);
        assert_eq!(
            "AtMostOne".parse::<SwitchRule>().unwrap(),
            SwitchRule::AtMostOne
        );
    }

    #[test]
    fn test_kind_tag_names() {
        for kind in [
            PropertyKind::Text,
            PropertyKind::Number,
            PropertyKind::Switch,
            PropertyKind::Light,
            PropertyKind::Blob,
        ] {
            assert_eq!(PropertyKind::from_tag_name(kind.tag_name()), Some(kind));
        }
        assert_eq!(PropertyKind::from_tag_name("Blob"), None);
    }
}
