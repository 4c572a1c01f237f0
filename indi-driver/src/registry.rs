//! The authoritative property registry of a driver process
//!
//! [`Driver`] owns every property of every device it hosts, the set of
//! attached sessions, and one dispatch queue per property. Inbound requests
//! are routed to the queue of the property they name; each queue runs its
//! handler calls one at a time on the blocking pool, so requests for the
//! same property are serialized while different properties proceed
//! independently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use indi_codec::{
    Definition, Deletion, Encoder, GetProperties, Message, NewValueRequest, Notice, ValueUpdate,
};
use indi_connection::{Connection, Fanout, Session, SessionId};
use indi_model::{Property, PropertyKey, PropertyKind, State, Value};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::config::DriverConfig;
use crate::device::DeviceState;
use crate::error::{DriverError, HandlerError, Result};
use crate::handler::{RequestHandler, UpdateContext};
use crate::store::{stored_values, ConfigStore, JsonFileConfigStore};

// ============================================================================
// Property slots
// ============================================================================

/// One registered property with its handler and dispatch queue
pub(crate) struct PropertySlot {
    key: PropertyKey,
    property: Mutex<Property>,
    handler: Mutex<Option<RequestHandler>>,
    defined: AtomicBool,
    queue: Mutex<Option<mpsc::UnboundedSender<NewValueRequest>>>,
}

impl PropertySlot {
    fn new(property: Property) -> Self {
        Self {
            key: property.key(),
            property: Mutex::new(property),
            handler: Mutex::new(None),
            defined: AtomicBool::new(false),
            queue: Mutex::new(None),
        }
    }

    fn is_defined(&self) -> bool {
        self.defined.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for PropertySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertySlot")
            .field("key", &self.key)
            .field("defined", &self.is_defined())
            .finish()
    }
}

// ============================================================================
// Driver
// ============================================================================

pub(crate) struct DriverInner {
    config: DriverConfig,
    properties: DashMap<PropertyKey, Arc<PropertySlot>>,
    order: Mutex<Vec<PropertyKey>>,
    fanout: Fanout,
    store: Option<Arc<dyn ConfigStore>>,
    pub(crate) devices: DashMap<String, Arc<DeviceState>>,
}

/// A driver process hosting one or more devices
///
/// Cheap to clone; every clone refers to the same registry.
#[derive(Clone)]
pub struct Driver {
    pub(crate) inner: Arc<DriverInner>,
}

/// Non-owning reference held by handles and background tasks
#[derive(Clone)]
pub(crate) struct WeakDriver(Weak<DriverInner>);

impl WeakDriver {
    pub(crate) fn upgrade(&self) -> Option<Driver> {
        self.0.upgrade().map(|inner| Driver { inner })
    }
}

impl Driver {
    /// Create a driver, opening the JSON config store when a path is set
    pub fn new(config: DriverConfig) -> Result<Self> {
        config.validate()?;
        let store = match &config.config_path {
            Some(path) => {
                let store: Arc<dyn ConfigStore> = Arc::new(JsonFileConfigStore::open(path)?);
                Some(store)
            }
            None => None,
        };
        Ok(Self::build(config, store))
    }

    /// Create a driver persisting saveable properties to `store`
    pub fn with_store(config: DriverConfig, store: Arc<dyn ConfigStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, Some(store)))
    }

    fn build(config: DriverConfig, store: Option<Arc<dyn ConfigStore>>) -> Self {
        let encoder = Encoder::new().with_compression(config.session.compress_blobs);
        info!("Starting driver {}", config.name);
        Self {
            inner: Arc::new(DriverInner {
                config,
                properties: DashMap::new(),
                order: Mutex::new(Vec::new()),
                fanout: Fanout::new(encoder),
                store,
                devices: DashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    /// Number of attached sessions
    pub fn session_count(&self) -> usize {
        self.inner.fanout.len()
    }

    pub(crate) fn downgrade(&self) -> WeakDriver {
        WeakDriver(Arc::downgrade(&self.inner))
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Add a property without making it visible
    ///
    /// Saveable properties pick up their stored values here, before any
    /// client can see them.
    pub fn register(&self, mut property: Property) -> Result<PropertyHandle> {
        let key = property.key();
        if self.inner.properties.contains_key(&key) {
            return Err(DriverError::AlreadyRegistered(key));
        }
        if property.is_saveable() {
            self.restore(&mut property);
        }

        let slot = Arc::new(PropertySlot::new(property));
        match self.inner.properties.entry(key.clone()) {
            Entry::Occupied(_) => return Err(DriverError::AlreadyRegistered(key)),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&slot));
            }
        }
        self.inner.order.lock().push(key.clone());
        debug!("Registered {}", key);
        Ok(PropertyHandle::new(self.downgrade(), slot))
    }

    /// Register a property and make it visible right away
    pub fn define(&self, property: Property) -> Result<PropertyHandle> {
        let handle = self.register(property)?;
        handle.define()?;
        Ok(handle)
    }

    /// Forget a property entirely, deleting it from clients if visible
    pub fn unregister(&self, key: &PropertyKey) -> Result<()> {
        let (_, slot) = self
            .inner
            .properties
            .remove(key)
            .ok_or_else(|| DriverError::UnknownProperty(key.clone()))?;
        self.inner.order.lock().retain(|k| k != key);
        if slot.defined.swap(false, Ordering::AcqRel) {
            self.broadcast(&Message::Delete(Deletion::property(&key.device, &key.name)));
        }
        debug!("Unregistered {}", key);
        Ok(())
    }

    pub fn property(&self, key: &PropertyKey) -> Option<PropertyHandle> {
        self.slot(key)
            .map(|slot| PropertyHandle::new(self.downgrade(), slot))
    }

    /// Registered property keys in registration order
    pub fn keys(&self) -> Vec<PropertyKey> {
        self.inner.order.lock().clone()
    }

    /// Copy of a property's current metadata and values
    pub fn snapshot(&self, key: &PropertyKey) -> Option<Property> {
        self.slot(key).map(|slot| slot.property.lock().clone())
    }

    fn slot(&self, key: &PropertyKey) -> Option<Arc<PropertySlot>> {
        self.inner
            .properties
            .get(key)
            .map(|slot| Arc::clone(slot.value()))
    }

    /// Drop every property of `device` and tell clients the device is gone
    pub(crate) fn forget_device(&self, device: &str) {
        let keys: Vec<PropertyKey> = self
            .inner
            .order
            .lock()
            .iter()
            .filter(|k| k.device == device)
            .cloned()
            .collect();
        for key in &keys {
            if let Some((_, slot)) = self.inner.properties.remove(key) {
                slot.defined.store(false, Ordering::Release);
            }
        }
        self.inner.order.lock().retain(|k| k.device != device);
        self.broadcast(&Message::Delete(Deletion::device(device)));
        debug!("Forgot {} properties of {}", keys.len(), device);
    }

    fn restore(&self, property: &mut Property) {
        let Some(store) = &self.inner.store else {
            return;
        };
        if property.kind() == PropertyKind::Blob {
            return;
        }
        let key = property.key();
        let stored = match store.load(property.device(), property.name()) {
            Ok(Some(stored)) => stored,
            Ok(None) => return,
            Err(e) => {
                warn!("Could not load stored values of {}: {}", key, e);
                return;
            }
        };

        let mut values = Vec::with_capacity(stored.len());
        for (element, text) in stored {
            let Some(parsed) = property.element(&element).map(|e| e.parse_text(&text)) else {
                debug!("Ignoring stored value for unknown element {}.{}", key, element);
                continue;
            };
            match parsed {
                Ok(value) => values.push((element, value)),
                Err(e) => warn!("Ignoring stored value {:?} for {}.{}: {}", text, key, element, e),
            }
        }
        match property.apply(values) {
            Ok(changed) => debug!("Restored {} values of {}", changed.len(), key),
            Err(e) => warn!("Ignoring stored values of {}: {}", key, e),
        }
    }

    fn persist(&self, property: &Property) {
        let Some(store) = &self.inner.store else {
            return;
        };
        let values = stored_values(property);
        if values.is_empty() {
            return;
        }
        if let Err(e) = store.save(property.device(), property.name(), values) {
            warn!("Could not save {}: {}", property.key(), e);
        }
    }

    // ========================================================================
    // Broadcast
    // ========================================================================

    fn broadcast(&self, message: &Message) {
        if let Err(e) = self.inner.fanout.broadcast(message) {
            error!("Could not broadcast {}: {}", message.tag(), e);
        }
    }

    /// Send the current state and values of a property to every client
    ///
    /// Properties that are not defined keep the update local; clients get
    /// the values with the next definition.
    pub(crate) fn publish(&self, slot: &PropertySlot, property: &Property, message: Option<&str>) {
        if !slot.is_defined() {
            trace!("{} is not defined, update kept local", slot.key);
            return;
        }
        let mut update = ValueUpdate::from_property(property, None);
        if let Some(message) = message {
            update = update.with_message(message);
        }
        self.broadcast(&Message::Set(update));
        if property.is_saveable() && property.state() == State::Ok {
            self.persist(property);
        }
    }

    /// Operator-visible notice, for one device or the whole driver
    pub fn message(&self, device: Option<&str>, text: impl Into<String>) {
        let text = text.into();
        debug!("Notice for {}: {}", device.unwrap_or("all devices"), text);
        self.broadcast(&Message::Message(Notice::new(device.map(str::to_string), text)));
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Serve a connection until the peer goes away
    ///
    /// Spawns the session's writer and reader tasks and returns at once.
    /// Must be called within a tokio runtime.
    pub fn attach(&self, connection: Connection) -> SessionId {
        let (mut reader, writer) = connection.split();
        let (session, _writer) = Session::spawn(writer, &self.inner.config.session);
        let id = session.id();
        info!("{} attached {} ({})", self.name(), id, session.peer());
        self.inner.fanout.attach(session);

        let driver = self.downgrade();
        tokio::spawn(async move {
            loop {
                let message = match reader.recv().await {
                    Ok(Some(message)) => message,
                    Ok(None) => {
                        debug!("{} closed by peer", id);
                        break;
                    }
                    Err(e) => {
                        warn!("Dropping {}: {}", id, e);
                        break;
                    }
                };
                let Some(driver) = driver.upgrade() else {
                    break;
                };
                driver.handle_message(id, message);
            }
            if let Some(driver) = driver.upgrade() {
                driver.inner.fanout.detach(id);
                info!("{} detached {}", driver.name(), id);
            }
        });
        id
    }

    /// Speak INDI over this process's stdin and stdout, the way a server
    /// launches drivers
    pub fn attach_stdio(&self) -> SessionId {
        let connection = Connection::new(
            tokio::io::stdin(),
            tokio::io::stdout(),
            "stdio",
            &self.inner.config.session,
        );
        self.attach(connection)
    }

    /// Accept clients on `listener` forever
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("{} listening on {}", self.name(), listener.local_addr()?);
        loop {
            let (stream, addr) = listener.accept().await?;
            debug!("Accepted connection from {}", addr);
            self.attach(Connection::from_tcp(stream, &self.inner.config.session));
        }
    }

    fn handle_message(&self, id: SessionId, message: Message) {
        match message {
            Message::GetProperties(request) => self.describe(id, &request),
            Message::New(request) => self.submit(request),
            Message::EnableBlob(request) => {
                if let Some(session) = self.inner.fanout.get(id) {
                    session.set_blob_policy(&request.device, request.name.as_deref(), request.policy);
                }
            }
            other => debug!("Ignoring {} from {}", other.tag(), id),
        }
    }

    /// Answer a `getProperties` with the matching definitions
    fn describe(&self, id: SessionId, request: &GetProperties) {
        let Some(session) = self.inner.fanout.get(id) else {
            return;
        };
        session.request_device(request.device.as_deref());

        for key in self.keys() {
            if request.device.as_deref().is_some_and(|d| d != key.device)
                || request.name.as_deref().is_some_and(|n| n != key.name)
            {
                continue;
            }
            let Some(slot) = self.slot(&key) else {
                continue;
            };
            if !slot.is_defined() {
                continue;
            }
            let definition = Definition::new(slot.property.lock().clone());
            if let Err(e) = self.inner.fanout.send_to(id, &Message::Define(definition)) {
                warn!("Could not describe {} to {}: {}", key, id, e);
                return;
            }
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Queue a client request on the dispatch queue of its property
    ///
    /// Requests for unknown or removed properties are dropped with a
    /// warning. Must be called within a tokio runtime.
    pub fn submit(&self, request: NewValueRequest) {
        let key = request.key();
        let Some(slot) = self.slot(&key) else {
            warn!("Dropping request for unknown property {}", key);
            return;
        };
        if !slot.is_defined() {
            warn!("Dropping request for removed property {}", key);
            return;
        }

        let mut queue = slot.queue.lock();
        let tx = queue.get_or_insert_with(|| self.spawn_dispatcher(&slot));
        if let Err(mpsc::error::SendError(request)) = tx.send(request) {
            let tx = self.spawn_dispatcher(&slot);
            if tx.send(request).is_err() {
                error!("Dispatch queue for {} is gone", key);
            }
            *queue = Some(tx);
        }
    }

    fn spawn_dispatcher(&self, slot: &Arc<PropertySlot>) -> mpsc::UnboundedSender<NewValueRequest> {
        let (tx, mut rx) = mpsc::unbounded_channel::<NewValueRequest>();
        let driver = self.downgrade();
        let weak_slot = Arc::downgrade(slot);
        let key = slot.key.clone();
        trace!("Starting dispatch queue for {}", key);

        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let (Some(driver), Some(slot)) = (driver.upgrade(), weak_slot.upgrade()) else {
                    break;
                };
                let outcome = tokio::task::spawn_blocking(move || driver.process(&slot, request)).await;
                if let Err(e) = outcome {
                    error!("Handler for {} panicked: {}", key, e);
                }
            }
            trace!("Dispatch queue for {} finished", key);
        });
        tx
    }

    /// Validate one request and hand it to the property's handler
    fn process(&self, slot: &Arc<PropertySlot>, request: NewValueRequest) {
        let key = &slot.key;
        if !slot.is_defined() {
            warn!("Dropping request for removed property {}", key);
            return;
        }
        let handler = slot.handler.lock().clone();
        let mut property = slot.property.lock();

        if !property.perm().accepts_requests() {
            warn!("Rejecting request for read-only property {}", key);
            self.reject(slot, &mut property, &format!("{} is read-only", key.name));
            return;
        }
        if request.kind != property.kind() {
            warn!(
                "Rejecting {} values for {} property {}",
                request.kind,
                property.kind(),
                key
            );
            let reason = format!("{} expects {} values", key.name, property.kind());
            self.reject(slot, &mut property, &reason);
            return;
        }
        let requested = match property.resolve(request.assignments()) {
            Ok(requested) => requested,
            Err(e) => {
                warn!("Rejecting request for {}: {}", key, e);
                self.reject(slot, &mut property, &e.to_string());
                return;
            }
        };
        debug!("Dispatching {} ({} values)", key, requested.len());

        let Some(handler) = handler else {
            match property.apply(requested) {
                Ok(_) => {
                    property.set_state(State::Ok);
                    self.publish(slot, &property, None);
                }
                Err(e) => self.reject(slot, &mut property, &e.to_string()),
            }
            return;
        };

        let mut ctx = UpdateContext::new(self, slot, &mut *property, requested);
        let outcome: std::result::Result<(), HandlerError> = handler(&mut ctx);
        let published = ctx.is_published();
        match outcome {
            Ok(()) if !published => self.publish(slot, &property, None),
            Ok(()) => {}
            Err(e) => {
                warn!("Handler for {} failed: {}", key, e);
                self.reject(slot, &mut property, e.message());
            }
        }
    }

    fn reject(&self, slot: &PropertySlot, property: &mut Property, reason: &str) {
        property.set_state(State::Alert);
        self.publish(slot, property, Some(reason));
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.inner.config.name)
            .field("properties", &self.inner.properties.len())
            .field("sessions", &self.inner.fanout.len())
            .finish()
    }
}

// ============================================================================
// Property handles
// ============================================================================

/// Driver-side handle to one registered property
///
/// Holds only a weak reference to the driver: operations fail with
/// [`DriverError::Shutdown`] once every [`Driver`] clone is gone.
#[derive(Clone)]
pub struct PropertyHandle {
    driver: WeakDriver,
    slot: Arc<PropertySlot>,
}

impl PropertyHandle {
    pub(crate) fn new(driver: WeakDriver, slot: Arc<PropertySlot>) -> Self {
        Self { driver, slot }
    }

    fn driver(&self) -> Result<Driver> {
        self.driver.upgrade().ok_or(DriverError::Shutdown)
    }

    pub fn key(&self) -> &PropertyKey {
        &self.slot.key
    }

    pub fn is_defined(&self) -> bool {
        self.slot.is_defined()
    }

    pub fn snapshot(&self) -> Property {
        self.slot.property.lock().clone()
    }

    pub fn value(&self, element: &str) -> Option<Value> {
        self.slot.property.lock().value(element)
    }

    pub fn state(&self) -> State {
        self.slot.property.lock().state()
    }

    /// Make the property visible and send its definition to every client
    ///
    /// The element set is frozen from here on.
    pub fn define(&self) -> Result<()> {
        let driver = self.driver()?;
        let definition = {
            let mut property = self.slot.property.lock();
            property.freeze();
            self.slot.defined.store(true, Ordering::Release);
            Definition::new(property.clone())
        };
        debug!("Defined {}", self.slot.key);
        driver.broadcast(&Message::Define(definition));
        Ok(())
    }

    /// Hide the property and tell clients to forget it
    ///
    /// Requests arriving afterwards are dropped until it is defined again.
    pub fn remove(&self) -> Result<()> {
        let driver = self.driver()?;
        if self.slot.defined.swap(false, Ordering::AcqRel) {
            debug!("Removed {}", self.slot.key);
            driver.broadcast(&Message::Delete(Deletion::property(
                &self.slot.key.device,
                &self.slot.key.name,
            )));
        }
        Ok(())
    }

    /// Install the handler for client requests, replacing any previous one
    ///
    /// Without a handler, valid requests are stored and published with
    /// state Ok.
    pub fn on_request<F>(&self, handler: F)
    where
        F: Fn(&mut UpdateContext<'_>) -> std::result::Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        *self.slot.handler.lock() = Some(Arc::new(handler));
    }

    /// Store values without telling clients
    pub fn apply<N, I>(&self, values: I) -> Result<Vec<String>>
    where
        N: AsRef<str>,
        I: IntoIterator<Item = (N, Value)>,
    {
        Ok(self.slot.property.lock().apply(values)?)
    }

    pub fn set_state(&self, state: State) {
        self.slot.property.lock().set_state(state);
    }

    /// Broadcast the current state and values
    pub fn publish(&self, message: Option<&str>) -> Result<()> {
        let driver = self.driver()?;
        let property = self.slot.property.lock();
        driver.publish(&self.slot, &property, message);
        Ok(())
    }

    /// Store values, set the state and broadcast, as one step
    pub fn update<N, I>(&self, values: I, state: State, message: Option<&str>) -> Result<Vec<String>>
    where
        N: AsRef<str>,
        I: IntoIterator<Item = (N, Value)>,
    {
        let driver = self.driver()?;
        let mut property = self.slot.property.lock();
        let changed = property.apply(values)?;
        property.set_state(state);
        driver.publish(&self.slot, &property, message);
        Ok(changed)
    }

    pub(crate) fn set_handler(&self, handler: RequestHandler) {
        *self.slot.handler.lock() = Some(handler);
    }

    /// Edit the property in place under its lock, without broadcasting
    pub fn edit<R>(&self, f: impl FnOnce(&mut Property) -> R) -> R {
        f(&mut self.slot.property.lock())
    }
}

impl std::fmt::Debug for PropertyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyHandle")
            .field("key", &self.slot.key)
            .field("defined", &self.slot.is_defined())
            .finish()
    }
}
