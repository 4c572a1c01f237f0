//! Devices and the standard CONNECTION lifecycle
//!
//! Every device added to a driver gets a `CONNECTION` switch with
//! `CONNECT` and `DISCONNECT` elements. Connecting runs the device's
//! connect hook and then defines the properties of every active extension;
//! disconnecting removes them again and runs the disconnect hook.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use indi_model::{Element, Property, PropertyKey, PropertyKind, State, SwitchRule, SwitchState, Value};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DriverError, ExtensionError, HandlerError, Result};
use crate::extension::{Capabilities, Extension, ExtensionBuilder, Gate, Naming};
use crate::registry::{Driver, PropertyHandle, WeakDriver};

/// Name of the standard connection switch
pub const CONNECTION: &str = "CONNECTION";
pub const CONNECT: &str = "CONNECT";
pub const DISCONNECT: &str = "DISCONNECT";

/// Hardware hooks of one device
///
/// Hooks run on the blocking pool while the `CONNECTION` property is
/// locked; they must not touch that property themselves, nor connect or
/// disconnect their own device.
pub trait DeviceDriver: Send + Sync + 'static {
    /// Open the hardware
    fn connect(&self, _device: &DeviceHandle) -> std::result::Result<(), HandlerError> {
        Ok(())
    }

    /// Release the hardware
    fn disconnect(&self, _device: &DeviceHandle) -> std::result::Result<(), HandlerError> {
        Ok(())
    }

    /// Capabilities extensions may depend on
    fn capabilities(&self) -> Capabilities {
        Capabilities::new()
    }
}

/// A device with nothing behind it
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHardware;

impl DeviceDriver for NoHardware {}

/// Identifies one attached extension instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionId(u64);

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ext-{}", self.0)
    }
}

#[derive(Clone)]
struct ExtensionInstance {
    id: ExtensionId,
    extension: Arc<dyn Extension>,
    naming: Naming,
    active: bool,
    properties: Vec<PropertyHandle>,
}

pub(crate) struct DeviceState {
    name: String,
    hooks: Arc<dyn DeviceDriver>,
    capabilities: Capabilities,
    connected: AtomicBool,
    /// Held while connecting or disconnecting
    lifecycle: Mutex<()>,
    extensions: Mutex<Vec<ExtensionInstance>>,
    next_extension: AtomicU64,
}

// ============================================================================
// Driver entry points
// ============================================================================

impl Driver {
    /// Host a new device and define its `CONNECTION` property
    pub fn add_device<D: DeviceDriver>(&self, name: impl Into<String>, hooks: D) -> Result<DeviceHandle> {
        let name = name.into();
        let hooks: Arc<dyn DeviceDriver> = Arc::new(hooks);
        let state = Arc::new(DeviceState {
            capabilities: hooks.capabilities(),
            name: name.clone(),
            hooks,
            connected: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            extensions: Mutex::new(Vec::new()),
            next_extension: AtomicU64::new(1),
        });

        match self.inner.devices.entry(name.clone()) {
            Entry::Occupied(_) => return Err(DriverError::DeviceExists(name)),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&state));
            }
        }

        let device = DeviceHandle {
            driver: self.downgrade(),
            state,
        };
        let connection = match connection_property(&name)
            .map_err(DriverError::from)
            .and_then(|property| self.define(property))
        {
            Ok(handle) => handle,
            Err(e) => {
                self.inner.devices.remove(&name);
                return Err(e);
            }
        };
        let lifecycle = device.clone();
        connection.on_request(move |ctx| {
            if ctx.requested_on(CONNECT) {
                lifecycle.bring_up()?;
                ctx.apply()?;
                ctx.set_state(State::Ok);
            } else if ctx.requested_on(DISCONNECT) {
                let outcome = lifecycle.tear_down();
                ctx.apply()?;
                ctx.set_state(State::Idle);
                outcome?;
            }
            Ok(())
        });

        info!("{} hosts device {}", self.name(), name);
        Ok(device)
    }

    pub fn device(&self, name: &str) -> Option<DeviceHandle> {
        self.inner.devices.get(name).map(|state| DeviceHandle {
            driver: self.downgrade(),
            state: Arc::clone(state.value()),
        })
    }

    /// Stop hosting a device, disconnecting it first
    ///
    /// Clients receive one device-wide deletion.
    pub fn remove_device(&self, name: &str) -> Result<()> {
        let (_, state) = self
            .inner
            .devices
            .remove(name)
            .ok_or_else(|| DriverError::UnknownDevice(name.to_string()))?;
        let device = DeviceHandle {
            driver: self.downgrade(),
            state,
        };
        if let Err(e) = device.tear_down() {
            warn!("Disconnecting {} failed: {}", name, e);
        }
        self.forget_device(name);
        info!("{} no longer hosts {}", self.name(), name);
        Ok(())
    }
}

fn connection_property(device: &str) -> indi_model::Result<Property> {
    Property::builder(device, CONNECTION, PropertyKind::Switch)
        .label("Connection")
        .group("Main Control")
        .rule(SwitchRule::OneOfMany)
        .element(Element::switch(CONNECT, SwitchState::Off).with_label("Connect"))
        .element(Element::switch(DISCONNECT, SwitchState::On).with_label("Disconnect"))
        .build()
}

// ============================================================================
// Device handle
// ============================================================================

/// Driver-side handle to one hosted device
#[derive(Clone)]
pub struct DeviceHandle {
    driver: WeakDriver,
    state: Arc<DeviceState>,
}

impl DeviceHandle {
    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.state.capabilities
    }

    pub fn driver(&self) -> Result<Driver> {
        self.driver.upgrade().ok_or(DriverError::Shutdown)
    }

    pub fn key(&self, property: &str) -> PropertyKey {
        PropertyKey::new(&self.state.name, property)
    }

    pub fn property(&self, name: &str) -> Option<PropertyHandle> {
        self.driver.upgrade()?.property(&self.key(name))
    }

    /// Register a property on this device without defining it
    pub fn register(&self, mut property: Property) -> Result<PropertyHandle> {
        property.set_device(self.name())?;
        self.driver()?.register(property)
    }

    /// Register a property on this device and define it now
    pub fn define(&self, property: Property) -> Result<PropertyHandle> {
        let handle = self.register(property)?;
        handle.define()?;
        Ok(handle)
    }

    /// Operator notice scoped to this device
    pub fn message(&self, text: impl Into<String>) -> Result<()> {
        self.driver()?.message(Some(self.name()), text);
        Ok(())
    }

    // ========================================================================
    // Extensions
    // ========================================================================

    /// Attach an extension instance under `naming`
    ///
    /// A missing required capability, a name collision or a failing build
    /// is reported here and leaves nothing registered. An optional
    /// extension whose capability is missing is attached inactive.
    pub fn add_extension<E: Extension>(&self, extension: E, naming: Naming) -> Result<ExtensionId> {
        let extension: Arc<dyn Extension> = Arc::new(extension);
        let id = ExtensionId(self.state.next_extension.fetch_add(1, Ordering::Relaxed));

        let active = match extension.requirement() {
            Some(requirement) if !self.state.capabilities.contains(&requirement.capability) => {
                match requirement.gate {
                    Gate::Required => {
                        return Err(ExtensionError::MissingCapability {
                            extension: extension.name().to_string(),
                            capability: requirement.capability.to_string(),
                        }
                        .into())
                    }
                    Gate::Optional => {
                        info!(
                            "{} on {} inactive: no {} capability",
                            extension.name(),
                            self.name(),
                            requirement.capability
                        );
                        false
                    }
                }
            }
            _ => true,
        };

        let mut properties = Vec::new();
        if active {
            let mut builder = ExtensionBuilder::new(self, extension.name(), &naming);
            let built = extension.build(&mut builder);
            properties = builder.finish();
            if let Err(e) = built {
                self.unregister_all(&properties);
                return Err(e.into());
            }
        }

        let instance = ExtensionInstance {
            id,
            extension,
            naming,
            active,
            properties,
        };
        if active && self.is_connected() {
            if let Err(e) = self.show(&instance) {
                warn!("{} failed to start on {}: {}", instance.extension.name(), self.name(), e);
            }
        }
        debug!(
            "Attached {} as {} to {} ({} properties)",
            instance.extension.name(),
            id,
            self.name(),
            instance.properties.len()
        );
        self.state.extensions.lock().push(instance);
        Ok(id)
    }

    /// Detach an extension instance, removing and forgetting its properties
    pub fn remove_extension(&self, id: ExtensionId) -> Result<()> {
        let instance = {
            let mut extensions = self.state.extensions.lock();
            let index = extensions
                .iter()
                .position(|i| i.id == id)
                .ok_or_else(|| ExtensionError::UnknownInstance(id.to_string()))?;
            extensions.remove(index)
        };
        if instance.active && self.is_connected() {
            self.hide(&instance);
        }
        self.unregister_all(&instance.properties);
        debug!("Detached {} from {}", id, self.name());
        Ok(())
    }

    /// Whether an attached instance is active
    pub fn extension_active(&self, id: ExtensionId) -> Option<bool> {
        self.state
            .extensions
            .lock()
            .iter()
            .find(|i| i.id == id)
            .map(|i| i.active)
    }

    fn unregister_all(&self, properties: &[PropertyHandle]) {
        let Some(driver) = self.driver.upgrade() else {
            return;
        };
        for handle in properties {
            if let Err(e) = driver.unregister(handle.key()) {
                debug!("Could not unregister {}: {}", handle.key(), e);
            }
        }
    }

    fn active_extensions(&self) -> Vec<ExtensionInstance> {
        self.state
            .extensions
            .lock()
            .iter()
            .filter(|i| i.active)
            .cloned()
            .collect()
    }

    fn show(&self, instance: &ExtensionInstance) -> std::result::Result<(), HandlerError> {
        for handle in &instance.properties {
            handle.define()?;
        }
        instance.extension.on_connect(self, &instance.naming)
    }

    fn hide(&self, instance: &ExtensionInstance) {
        if let Err(e) = instance.extension.on_disconnect(self, &instance.naming) {
            warn!("{} on {} failed to stop: {}", instance.extension.name(), self.name(), e);
        }
        for handle in &instance.properties {
            if let Err(e) = handle.remove() {
                debug!("Could not remove {}: {}", handle.key(), e);
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connect without a client request, publishing the new `CONNECTION`
    /// state
    pub fn connect(&self) -> Result<()> {
        let outcome = self.bring_up();
        self.publish_connection(outcome.is_ok(), outcome.as_ref().err())?;
        Ok(outcome?)
    }

    /// Disconnect without a client request, publishing the new
    /// `CONNECTION` state
    pub fn disconnect(&self) -> Result<()> {
        let outcome = self.tear_down();
        self.publish_connection(false, outcome.as_ref().err())?;
        Ok(outcome?)
    }

    fn publish_connection(&self, connected: bool, error: Option<&HandlerError>) -> Result<()> {
        let Some(connection) = self.property(CONNECTION) else {
            return Err(DriverError::UnknownProperty(self.key(CONNECTION)));
        };
        let state = match (connected, error) {
            (_, Some(_)) => State::Alert,
            (true, None) => State::Ok,
            (false, None) => State::Idle,
        };
        let values = [
            (CONNECT, Value::Switch(connected.into())),
            (DISCONNECT, Value::Switch((!connected).into())),
        ];
        connection.update(values, state, error.map(HandlerError::message))?;
        Ok(())
    }

    /// Run the connect hook, then start every active extension
    ///
    /// On failure everything already started is stopped again and the
    /// device stays disconnected. Concurrent calls run the hooks once.
    pub(crate) fn bring_up(&self) -> std::result::Result<(), HandlerError> {
        let _lifecycle = self.state.lifecycle.lock();
        if self.is_connected() {
            return Ok(());
        }
        self.state.hooks.connect(self)?;

        let extensions = self.active_extensions();
        for (started, instance) in extensions.iter().enumerate() {
            if let Err(e) = self.show(instance) {
                warn!("{} failed to start on {}: {}", instance.extension.name(), self.name(), e);
                for instance in extensions[..=started].iter().rev() {
                    self.hide(instance);
                }
                if let Err(e) = self.state.hooks.disconnect(self) {
                    warn!("Disconnect hook of {} failed: {}", self.name(), e);
                }
                return Err(e);
            }
        }

        self.state.connected.store(true, Ordering::Release);
        info!("{} connected", self.name());
        Ok(())
    }

    /// Stop every active extension, then run the disconnect hook
    pub(crate) fn tear_down(&self) -> std::result::Result<(), HandlerError> {
        let _lifecycle = self.state.lifecycle.lock();
        if !self.state.connected.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        for instance in self.active_extensions().iter().rev() {
            self.hide(instance);
        }
        info!("{} disconnected", self.name());
        self.state.hooks.disconnect(self)
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("name", &self.state.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}
