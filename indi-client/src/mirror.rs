//! Local read mirror of the properties a server has defined
//!
//! The mirror is only ever written by the connection's receive loop, one
//! message at a time. Readers take snapshots; nothing handed out borrows the
//! mirror's lock.

use std::collections::HashMap;

use indi_codec::{Definition, Deletion, Message, NewValueRequest, Notice, OneValue, ValueUpdate};
use indi_model::{Property, PropertyKey, Value};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::event::MirrorEvent;

/// One mirror event with the property as it stands right after it
///
/// `property` is the new state for definitions and updates, and the last
/// known state for removals.
#[derive(Debug, Clone)]
pub struct Change {
    pub event: MirrorEvent,
    pub property: Option<Property>,
}

impl Change {
    fn new(event: MirrorEvent, property: Option<Property>) -> Self {
        Self { event, property }
    }
}

#[derive(Debug, Default)]
struct MirrorState {
    devices: Vec<String>,
    properties: HashMap<PropertyKey, Property>,
    order: Vec<PropertyKey>,
}

/// Client-side copy of every property the server has defined
#[derive(Debug, Default)]
pub struct Mirror {
    state: RwLock<MirrorState>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Snapshot of one property
    pub fn get(&self, key: &PropertyKey) -> Option<Property> {
        self.state.read().properties.get(key).cloned()
    }

    pub fn property(&self, device: &str, name: &str) -> Option<Property> {
        self.get(&PropertyKey::new(device, name))
    }

    /// Run `f` against a property without cloning it
    pub fn with<R>(&self, key: &PropertyKey, f: impl FnOnce(&Property) -> R) -> Option<R> {
        self.state.read().properties.get(key).map(f)
    }

    /// Current value of one element
    pub fn value(&self, key: &PropertyKey, element: &str) -> Option<Value> {
        self.with(key, |p| p.value(element)).flatten()
    }

    pub fn contains(&self, key: &PropertyKey) -> bool {
        self.state.read().properties.contains_key(key)
    }

    /// Known devices, in the order they first appeared
    pub fn devices(&self) -> Vec<String> {
        self.state.read().devices.clone()
    }

    /// Snapshots of a device's properties, in definition order
    pub fn properties(&self, device: &str) -> Vec<Property> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter(|key| key.device == device)
            .filter_map(|key| state.properties.get(key).cloned())
            .collect()
    }

    /// Every mirrored property key, in definition order
    pub fn keys(&self) -> Vec<PropertyKey> {
        self.state.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Check a set of desired values against the mirrored property and turn
    /// them into one request
    ///
    /// Fails without touching the connection when the property is unknown or
    /// read-only, names an element it does not have, or carries a value of
    /// the wrong kind. Ranges and switch rules are left to the driver.
    pub fn prepare_request(
        &self,
        key: &PropertyKey,
        values: &[(String, Value)],
    ) -> Result<NewValueRequest> {
        let state = self.state.read();
        let property = state
            .properties
            .get(key)
            .ok_or_else(|| ClientError::UnknownProperty(key.clone()))?;

        if !property.perm().accepts_requests() {
            return Err(ClientError::ReadOnly(key.clone()));
        }
        if values.is_empty() {
            return Err(ClientError::EmptyRequest(key.clone()));
        }

        let mut request = NewValueRequest::new(&key.device, &key.name, property.kind());
        for (element, value) in values {
            if property.element(element).is_none() {
                return Err(ClientError::UnknownElement {
                    property: key.clone(),
                    element: element.clone(),
                });
            }
            if value.kind() != property.kind() {
                return Err(ClientError::KindMismatch {
                    property: key.clone(),
                    expected: property.kind(),
                    found: value.kind(),
                });
            }
            request.values.push(OneValue::new(element.as_str(), value.clone()));
        }
        Ok(request)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Fold one server message into the mirror
    ///
    /// Returns the resulting changes in the order listeners must see them.
    /// Messages that make no sense against the current mirror (an update for
    /// an undefined property, unknown elements) are logged and yield nothing.
    pub fn apply(&self, message: &Message) -> Vec<Change> {
        match message {
            Message::Define(definition) => self.define(definition),
            Message::Set(update) => self.update(update).into_iter().collect(),
            Message::Delete(deletion) => self.delete(deletion),
            Message::Message(notice) => vec![Self::notice(notice)],
            other => {
                debug!("Ignoring {} from server", other.tag());
                Vec::new()
            }
        }
    }

    fn define(&self, definition: &Definition) -> Vec<Change> {
        let mut property = definition.property.clone();
        property.freeze();
        let key = property.key();
        let mut changes = Vec::new();

        let mut state = self.state.write();
        if !state.devices.iter().any(|d| d == &key.device) {
            state.devices.push(key.device.clone());
            changes.push(Change::new(
                MirrorEvent::DeviceAppeared {
                    device: key.device.clone(),
                },
                None,
            ));
        }
        if state
            .properties
            .insert(key.clone(), property.clone())
            .is_none()
        {
            state.order.push(key.clone());
        } else {
            debug!("Property {} redefined", key);
        }
        changes.push(Change::new(
            MirrorEvent::PropertyDefined { key },
            Some(property),
        ));
        changes
    }

    fn update(&self, update: &ValueUpdate) -> Option<Change> {
        let key = update.key();
        let mut state = self.state.write();
        let Some(property) = state.properties.get_mut(&key) else {
            warn!("Update for undefined property {}", key);
            return None;
        };

        let changed = match property.merge(
            update
                .values
                .iter()
                .map(|one| (one.name.as_str(), one.value.clone())),
        ) {
            Ok(changed) => changed,
            Err(e) => {
                warn!("Dropping update for {}: {}", key, e);
                return None;
            }
        };
        if let Some(new_state) = update.state {
            property.set_state(new_state);
        }
        if let Some(timeout) = update.timeout {
            property.set_timeout(timeout);
        }

        Some(Change::new(
            MirrorEvent::PropertyUpdated {
                key,
                state: property.state(),
                changed,
                message: update.message.clone(),
            },
            Some(property.clone()),
        ))
    }

    fn delete(&self, deletion: &Deletion) -> Vec<Change> {
        let mut state = self.state.write();
        match &deletion.name {
            Some(name) => {
                let key = PropertyKey::new(&deletion.device, name);
                match state.properties.remove(&key) {
                    Some(property) => {
                        state.order.retain(|k| k != &key);
                        vec![Change::new(
                            MirrorEvent::PropertyRemoved { key },
                            Some(property),
                        )]
                    }
                    None => {
                        debug!("Deletion of unknown property {}", key);
                        Vec::new()
                    }
                }
            }
            None => {
                let device = deletion.device.clone();
                let (gone, kept): (Vec<PropertyKey>, Vec<PropertyKey>) = state
                    .order
                    .drain(..)
                    .partition(|key| key.device == device);
                state.order = kept;

                let mut changes: Vec<Change> = gone
                    .into_iter()
                    .filter_map(|key| {
                        let property = state.properties.remove(&key)?;
                        Some(Change::new(
                            MirrorEvent::PropertyRemoved { key },
                            Some(property),
                        ))
                    })
                    .collect();

                let known = state.devices.len();
                state.devices.retain(|d| d != &device);
                if state.devices.len() != known {
                    changes.push(Change::new(MirrorEvent::DeviceRemoved { device }, None));
                }
                changes
            }
        }
    }

    fn notice(notice: &Notice) -> Change {
        Change::new(
            MirrorEvent::Message {
                device: notice.device.clone(),
                text: notice.message.clone(),
            },
            None,
        )
    }
}
