//! Connection to an INDI server or driver, and the mirror it keeps current

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::time::Duration;

use indi_codec::{BlobPolicy, EnableBlob, GetProperties, Message, NewValueRequest};
use indi_connection::{Connection, MessageReader, MessageWriter, SessionConfig};
use indi_model::{Property, PropertyKey};
use parking_lot::Mutex;
use tokio::net::ToSocketAddrs;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::event::MirrorEvent;
use crate::iter::ChangeIterator;
use crate::listener::{ListenerId, ListenerScope, Listeners};
use crate::mirror::{Change, Mirror};
use crate::request::RequestBuilder;

// ============================================================================
// Configuration
// ============================================================================

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Framing and buffering of the connection
    pub session: SessionConfig,

    /// Send `getProperties` for every device as soon as the connection is up
    /// Default: true
    pub ask_on_connect: bool,

    /// Events buffered per async subscriber before it starts lagging
    /// Default: 1024
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            ask_on_connect: true,
            event_capacity: 1024,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        if self.event_capacity == 0 {
            return Err(ClientError::Configuration(
                "Event capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_ask_on_connect(mut self, ask: bool) -> Self {
        self.ask_on_connect = ask;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

// ============================================================================
// Client
// ============================================================================

struct ClientInner {
    peer: String,
    mirror: Mirror,
    listeners: Listeners,
    writer: tokio::sync::Mutex<MessageWriter>,
    closed: AtomicBool,
    events: broadcast::Sender<MirrorEvent>,
    iterating: AtomicBool,
    iter_tx: mpsc::Sender<MirrorEvent>,
    iter_rx: Arc<Mutex<mpsc::Receiver<MirrorEvent>>>,
}

impl ClientInner {
    fn handle(&self, message: &Message) {
        for change in self.mirror.apply(message) {
            self.emit(change);
        }
    }

    /// Listeners first, then the blocking iterator, then async subscribers
    fn emit(&self, change: Change) {
        let Change { event, property } = change;
        self.listeners.dispatch(&event, property.as_ref());
        if self.iterating.load(Ordering::Acquire) {
            let _ = self.iter_tx.send(event.clone());
        }
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}

/// A connected client with its property mirror
///
/// Cheap to clone; clones share the connection. Dropping the last clone
/// closes the connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Connect over TCP (an INDI server listens on port 7624)
    pub async fn connect(addr: impl ToSocketAddrs, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let connection = Connection::connect_tcp(addr, &config.session).await?;
        Self::attach(connection, config).await
    }

    /// Run the client over an existing connection
    pub async fn attach(connection: Connection, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let peer = connection.peer().to_string();
        let (reader, writer) = connection.split();
        let (events, _) = broadcast::channel(config.event_capacity);
        let (iter_tx, iter_rx) = mpsc::channel();

        let inner = Arc::new(ClientInner {
            peer,
            mirror: Mirror::new(),
            listeners: Listeners::new(),
            writer: tokio::sync::Mutex::new(writer),
            closed: AtomicBool::new(false),
            events,
            iterating: AtomicBool::new(false),
            iter_tx,
            iter_rx: Arc::new(Mutex::new(iter_rx)),
        });
        tokio::spawn(receive_loop(Arc::downgrade(&inner), reader));
        info!("Connected to {}", inner.peer);

        let client = Self { inner };
        if config.ask_on_connect {
            client.get_properties(None, None).await?;
        }
        Ok(client)
    }

    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    /// Whether the server side of the connection has gone away
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // ========================================================================
    // Mirror access
    // ========================================================================

    /// The mirror; it keeps its last contents after disconnection
    pub fn mirror(&self) -> &Mirror {
        &self.inner.mirror
    }

    /// Snapshot of one mirrored property
    pub fn property(&self, device: &str, name: &str) -> Option<Property> {
        self.inner.mirror.property(device, name)
    }

    /// Wait until `condition` holds for the mirror
    pub async fn wait_until<F>(&self, timeout: Duration, condition: F) -> Result<()>
    where
        F: Fn(&Mirror) -> bool,
    {
        let mut events = self.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition(self.mirror()) {
                return Ok(());
            }
            if self.is_closed() {
                return Err(ClientError::Closed);
            }
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Err(_) => return Err(ClientError::Timeout(timeout)),
                Ok(Err(broadcast::error::RecvError::Closed)) => return Err(ClientError::Closed),
                // Lagging only means re-checking sooner
                Ok(_) => {}
            }
        }
    }

    /// Wait until the server has defined a property
    pub async fn wait_for_property(
        &self,
        device: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<Property> {
        let key = PropertyKey::new(device, name);
        self.wait_until(timeout, |mirror| mirror.contains(&key))
            .await?;
        self.inner
            .mirror
            .get(&key)
            .ok_or(ClientError::UnknownProperty(key))
    }

    // ========================================================================
    // Outbound messages
    // ========================================================================

    /// Ask for definitions: everything, one device, or one property
    pub async fn get_properties(&self, device: Option<&str>, name: Option<&str>) -> Result<()> {
        let request = match (device, name) {
            (Some(device), Some(name)) => GetProperties::property(device, name),
            (Some(device), None) => GetProperties::device(device),
            _ => GetProperties::all(),
        };
        self.send(&Message::GetProperties(request)).await
    }

    /// Choose whether BLOB updates for a device (or one property) arrive
    pub async fn enable_blob(
        &self,
        device: &str,
        name: Option<&str>,
        policy: BlobPolicy,
    ) -> Result<()> {
        self.send(&Message::EnableBlob(EnableBlob {
            device: device.to_string(),
            name: name.map(str::to_string),
            policy,
        }))
        .await
    }

    /// Start building a request for new values
    pub fn request(&self, device: &str, name: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, PropertyKey::new(device, name))
    }

    /// Send a request after checking it against the mirror
    pub async fn send_request(&self, request: NewValueRequest) -> Result<()> {
        let key = request.key();
        let values = request.assignments();
        let checked = self.inner.mirror.prepare_request(&key, &values)?;
        debug!("Requesting {} element(s) of {}", checked.values.len(), key);
        self.send(&Message::New(checked)).await
    }

    async fn send(&self, message: &Message) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        self.inner.writer.lock().await.send(message).await?;
        Ok(())
    }

    /// Close the write direction; the mirror stays readable
    pub async fn close(&self) -> Result<()> {
        self.inner.writer.lock().await.shutdown().await?;
        Ok(())
    }

    // ========================================================================
    // Change notification
    // ========================================================================

    /// Listen to every event
    pub fn on_event<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&MirrorEvent, Option<&Property>) + Send + Sync + 'static,
    {
        self.inner.listeners.add(ListenerScope::All, listener)
    }

    /// Listen to one device and its properties
    pub fn on_device<F>(&self, device: &str, listener: F) -> ListenerId
    where
        F: Fn(&MirrorEvent, Option<&Property>) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .add(ListenerScope::Device(device.to_string()), listener)
    }

    /// Listen to every definition, update and removal of one property
    pub fn on_property<F>(&self, device: &str, name: &str, listener: F) -> ListenerId
    where
        F: Fn(&MirrorEvent, Option<&Property>) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .add(ListenerScope::Property(PropertyKey::new(device, name)), listener)
    }

    /// Listen to changes of one element's value
    pub fn on_element<F>(&self, device: &str, name: &str, element: &str, listener: F) -> ListenerId
    where
        F: Fn(&MirrorEvent, Option<&Property>) + Send + Sync + 'static,
    {
        self.inner.listeners.add(
            ListenerScope::Element(PropertyKey::new(device, name), element.to_string()),
            listener,
        )
    }

    /// Returns whether the listener was registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Async stream of events from now on
    ///
    /// A subscriber that falls more than `event_capacity` events behind
    /// receives `RecvError::Lagged` and skips ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.inner.events.subscribe()
    }

    /// Blocking iterator over events from now on
    ///
    /// Events are queued for iterators only once the first one has been
    /// requested. All iterators share one queue.
    pub fn iter(&self) -> ChangeIterator {
        self.inner.iterating.store(true, Ordering::Release);
        ChangeIterator::new(Arc::clone(&self.inner.iter_rx))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .field("properties", &self.inner.mirror.len())
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}

/// Decode messages until the server goes away or every client clone is
/// dropped
async fn receive_loop(inner: Weak<ClientInner>, mut reader: MessageReader) {
    loop {
        let message = match reader.recv().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                info!("{} closed the connection", reader.peer());
                break;
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", reader.peer(), e);
                break;
            }
        };
        let Some(inner) = inner.upgrade() else {
            debug!("Client dropped, stopping receive loop for {}", reader.peer());
            return;
        };
        inner.handle(&message);
    }

    if let Some(inner) = inner.upgrade() {
        inner.closed.store(true, Ordering::Release);
        inner.emit(Change {
            event: MirrorEvent::Disconnected,
            property: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert!(config.ask_on_connect);
        assert_eq!(config.event_capacity, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_event_capacity_is_invalid() {
        let config = ClientConfig::new().with_event_capacity(0);
        assert!(matches!(
            config.validate(),
            Err(ClientError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_session_config_is_reported() {
        let config =
            ClientConfig::new().with_session(SessionConfig::new().with_outbound_queue_len(0));
        assert!(matches!(config.validate(), Err(ClientError::Connection(_))));
    }
}
