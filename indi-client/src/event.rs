//! Changes to the client mirror
//!
//! Every message from the server that touches the mirror yields one or
//! more events, in wire order. Updates are never coalesced: two value
//! updates in a row produce two events even if the second restores the
//! first value.

use indi_model::{PropertyKey, State};

/// One change to the mirror
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    /// First property of a device arrived
    DeviceAppeared { device: String },

    /// A property was defined, or redefined
    PropertyDefined { key: PropertyKey },

    /// New state and values for a property
    ///
    /// `changed` lists the elements whose value differs from before, in
    /// definition order; it may be empty when only the state moved.
    PropertyUpdated {
        key: PropertyKey,
        state: State,
        changed: Vec<String>,
        message: Option<String>,
    },

    /// A property was deleted
    PropertyRemoved { key: PropertyKey },

    /// A whole device was deleted
    DeviceRemoved { device: String },

    /// Operator notice, optionally tied to a device
    Message { device: Option<String>, text: String },

    /// The connection to the server ended
    Disconnected,
}

impl MirrorEvent {
    /// Device the event concerns, when there is one
    pub fn device(&self) -> Option<&str> {
        match self {
            MirrorEvent::DeviceAppeared { device } | MirrorEvent::DeviceRemoved { device } => {
                Some(device)
            }
            MirrorEvent::PropertyDefined { key }
            | MirrorEvent::PropertyUpdated { key, .. }
            | MirrorEvent::PropertyRemoved { key } => Some(&key.device),
            MirrorEvent::Message { device, .. } => device.as_deref(),
            MirrorEvent::Disconnected => None,
        }
    }

    /// Property the event concerns, when there is one
    pub fn key(&self) -> Option<&PropertyKey> {
        match self {
            MirrorEvent::PropertyDefined { key }
            | MirrorEvent::PropertyUpdated { key, .. }
            | MirrorEvent::PropertyRemoved { key } => Some(key),
            _ => None,
        }
    }

    /// Whether the event reports a new value for `element`
    pub fn touches_element(&self, element: &str) -> bool {
        match self {
            MirrorEvent::PropertyDefined { .. } => true,
            MirrorEvent::PropertyUpdated { changed, .. } => changed.iter().any(|e| e == element),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let key = PropertyKey::new("Cam", "TEMP");
        let event = MirrorEvent::PropertyUpdated {
            key: key.clone(),
            state: State::Busy,
            changed: vec!["VALUE".into()],
            message: None,
        };
        assert_eq!(event.device(), Some("Cam"));
        assert_eq!(event.key(), Some(&key));
        assert!(event.touches_element("VALUE"));
        assert!(!event.touches_element("OTHER"));

        let notice = MirrorEvent::Message {
            device: None,
            text: "hello".into(),
        };
        assert_eq!(notice.device(), None);
        assert_eq!(notice.key(), None);
    }
}
