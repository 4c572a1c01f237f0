//! Listener registration and synchronous dispatch
//!
//! Listeners run on the connection's receive loop, right after the mirror
//! has absorbed the message, and in wire order. A slow listener therefore
//! delays every later message; hand heavy work to a task or thread.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indi_model::{Property, PropertyKey};
use parking_lot::RwLock;

use crate::event::MirrorEvent;

/// Callback invoked for every matching event
///
/// The property argument is the mirrored property right after the change
/// (or the last known one for removals) and `None` for device-level events.
pub type Listener = Arc<dyn Fn(&MirrorEvent, Option<&Property>) + Send + Sync>;

/// Handle returned by listener registration, used for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Which events a listener wants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerScope {
    /// Everything, including operator messages and disconnection
    All,
    /// Events about one device and its properties
    Device(String),
    /// Definition, updates and removal of one property
    Property(PropertyKey),
    /// Definition of the property, and updates that change this element
    Element(PropertyKey, String),
}

impl ListenerScope {
    pub fn matches(&self, event: &MirrorEvent) -> bool {
        match self {
            ListenerScope::All => true,
            ListenerScope::Device(device) => event.device() == Some(device.as_str()),
            ListenerScope::Property(key) => event.key() == Some(key),
            ListenerScope::Element(key, element) => {
                event.key() == Some(key) && event.touches_element(element)
            }
        }
    }
}

struct Entry {
    id: ListenerId,
    scope: ListenerScope,
    listener: Listener,
}

/// Registered listeners, in registration order
#[derive(Default)]
pub struct Listeners {
    entries: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&self, scope: ListenerScope, listener: F) -> ListenerId
    where
        F: Fn(&MirrorEvent, Option<&Property>) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push(Entry {
            id,
            scope,
            listener: Arc::new(listener),
        });
        id
    }

    /// Returns whether the listener was registered
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener whose scope matches the event
    ///
    /// Matching listeners are collected first, so a listener may register
    /// or remove listeners without deadlocking; such changes take effect
    /// from the next event.
    pub fn dispatch(&self, event: &MirrorEvent, property: Option<&Property>) -> usize {
        let matching: Vec<Listener> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.scope.matches(event))
            .map(|e| Arc::clone(&e.listener))
            .collect();
        for listener in &matching {
            listener(event, property);
        }
        matching.len()
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indi_model::State;
    use parking_lot::Mutex;
    use rstest::rstest;

    fn updated(name: &str, changed: &[&str]) -> MirrorEvent {
        MirrorEvent::PropertyUpdated {
            key: PropertyKey::new("Cam", name),
            state: State::Ok,
            changed: changed.iter().map(|s| s.to_string()).collect(),
            message: None,
        }
    }

    #[rstest]
    #[case(ListenerScope::All, true)]
    #[case(ListenerScope::Device("Cam".into()), true)]
    #[case(ListenerScope::Device("Mount".into()), false)]
    #[case(ListenerScope::Property(PropertyKey::new("Cam", "TEMP")), true)]
    #[case(ListenerScope::Property(PropertyKey::new("Cam", "GAIN")), false)]
    #[case(ListenerScope::Element(PropertyKey::new("Cam", "TEMP"), "VALUE".into()), true)]
    #[case(ListenerScope::Element(PropertyKey::new("Cam", "TEMP"), "TARGET".into()), false)]
    fn test_scope_matching(#[case] scope: ListenerScope, #[case] expected: bool) {
        assert_eq!(scope.matches(&updated("TEMP", &["VALUE"])), expected);
    }

    #[test]
    fn test_operator_message_reaches_device_and_global_listeners() {
        let event = MirrorEvent::Message {
            device: Some("Cam".into()),
            text: "cooling".into(),
        };
        assert!(ListenerScope::All.matches(&event));
        assert!(ListenerScope::Device("Cam".into()).matches(&event));
        assert!(!ListenerScope::Property(PropertyKey::new("Cam", "TEMP")).matches(&event));
    }

    #[test]
    fn test_dispatch_in_registration_order_and_removal() {
        let listeners = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        let first = listeners.add(ListenerScope::All, move |_, _| log.lock().push("first"));
        let log = Arc::clone(&seen);
        listeners.add(ListenerScope::Device("Cam".into()), move |_, _| {
            log.lock().push("second")
        });

        assert_eq!(listeners.dispatch(&updated("TEMP", &[]), None), 2);
        assert_eq!(*seen.lock(), vec!["first", "second"]);

        assert!(listeners.remove(first));
        assert!(!listeners.remove(first));
        assert_eq!(listeners.dispatch(&updated("TEMP", &[]), None), 1);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_listener_can_register_during_dispatch() {
        let listeners = Arc::new(Listeners::new());
        let inner = Arc::clone(&listeners);
        listeners.add(ListenerScope::All, move |_, _| {
            inner.add(ListenerScope::All, |_, _| {});
        });
        assert_eq!(listeners.dispatch(&updated("TEMP", &[]), None), 1);
        assert_eq!(listeners.len(), 2);
    }
}
