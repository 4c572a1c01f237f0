//! Driver-side view of one attached peer
//!
//! A [`Session`] remembers which devices the peer asked for and which BLOB
//! policy applies to each of them, and owns a bounded queue of encoded
//! frames drained by a dedicated writer task. Broadcasting never awaits a
//! peer: frames are pushed with `try_send`, and a peer whose queue is full
//! or whose writer has died is reported so it can be dropped.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use indi_codec::{BlobPolicy, Message};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{ConnectionError, Result};
use crate::transport::MessageWriter;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an attached session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate a process-wide unique id
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Devices a session has asked to hear about
///
/// Empty until the first `getProperties`. A request without a device opens
/// the scope to every device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceScope {
    all: bool,
    devices: HashSet<String>,
}

impl DeviceScope {
    pub fn everything() -> Self {
        Self {
            all: true,
            devices: HashSet::new(),
        }
    }

    pub fn add(&mut self, device: Option<&str>) {
        match device {
            Some(device) => {
                self.devices.insert(device.to_string());
            }
            None => self.all = true,
        }
    }

    pub fn contains(&self, device: &str) -> bool {
        self.all || self.devices.contains(device)
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.devices.is_empty()
    }
}

/// BLOB policies keyed by device and optionally property
#[derive(Debug, Clone, Default)]
struct BlobPolicies {
    default: BlobPolicy,
    rules: HashMap<(String, Option<String>), BlobPolicy>,
}

impl BlobPolicies {
    fn lookup(&self, device: &str, name: &str) -> BlobPolicy {
        self.rules
            .get(&(device.to_string(), Some(name.to_string())))
            .or_else(|| self.rules.get(&(device.to_string(), None)))
            .copied()
            .unwrap_or(self.default)
    }
}

/// One attached peer
pub struct Session {
    id: SessionId,
    peer: String,
    scope: RwLock<DeviceScope>,
    blobs: RwLock<BlobPolicies>,
    outbound: mpsc::Sender<Bytes>,
}

impl Session {
    /// Create a session and spawn the task that drains its queue into
    /// `writer`
    ///
    /// The task ends when the session is dropped or the transport fails.
    pub fn spawn(writer: MessageWriter, config: &SessionConfig) -> (Arc<Session>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.outbound_queue_len.max(1));
        let session = Arc::new(Session::new(writer.peer().to_string(), tx, config));
        let task = tokio::spawn(drain(session.id, writer, rx));
        (session, task)
    }

    /// A session whose frames land in the returned receiver
    pub fn detached(
        peer: impl Into<String>,
        config: &SessionConfig,
    ) -> (Arc<Session>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(config.outbound_queue_len.max(1));
        (Arc::new(Session::new(peer.into(), tx, config)), rx)
    }

    fn new(peer: String, outbound: mpsc::Sender<Bytes>, config: &SessionConfig) -> Self {
        Self {
            id: SessionId::next(),
            peer,
            scope: RwLock::new(DeviceScope::default()),
            blobs: RwLock::new(BlobPolicies {
                default: config.default_blob_policy,
                rules: HashMap::new(),
            }),
            outbound,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Record a `getProperties` from the peer
    pub fn request_device(&self, device: Option<&str>) {
        self.scope.write().add(device);
    }

    pub fn scope(&self) -> DeviceScope {
        self.scope.read().clone()
    }

    /// Record an `enableBLOB` from the peer
    pub fn set_blob_policy(&self, device: &str, name: Option<&str>, policy: BlobPolicy) {
        debug!(
            "{} BLOB policy for {}{}{} = {}",
            self.id,
            device,
            if name.is_some() { "." } else { "" },
            name.unwrap_or_default(),
            policy
        );
        self.blobs
            .write()
            .rules
            .insert((device.to_string(), name.map(str::to_string)), policy);
    }

    pub fn blob_policy(&self, device: &str, name: &str) -> BlobPolicy {
        self.blobs.read().lookup(device, name)
    }

    /// Whether a broadcast message should reach this peer
    ///
    /// Everything is filtered by device scope. Value updates are further
    /// filtered by the BLOB policy; definitions and deletions never are.
    pub fn accepts(&self, message: &Message) -> bool {
        let scope = self.scope.read();
        match message {
            Message::Define(m) => scope.contains(m.property.device()),
            Message::Set(m) => {
                scope.contains(&m.device) && self.blob_policy(&m.device, &m.name).admits(m.kind)
            }
            Message::Delete(m) => scope.contains(&m.device),
            Message::Message(m) => m.device.as_deref().map_or(!scope.is_empty(), |d| scope.contains(d)),
            Message::GetProperties(_) | Message::New(_) | Message::EnableBlob(_) => true,
        }
    }

    /// Queue an encoded frame without waiting
    pub fn try_send(&self, frame: Bytes) -> Result<()> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ConnectionError::SlowConsumer(self.id),
            mpsc::error::TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }

    /// Whether the writer task has gone away
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("scope", &*self.scope.read())
            .finish()
    }
}

async fn drain(id: SessionId, mut writer: MessageWriter, mut rx: mpsc::Receiver<Bytes>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = writer.send_frame(&frame).await {
            warn!("{} ({}) write failed, dropping session: {}", id, writer.peer(), e);
            return;
        }
    }
    let _ = writer.shutdown().await;
    debug!("{} writer finished", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use indi_codec::{Deletion, Notice, ValueUpdate};
    use indi_model::{Element, Property, PropertyKind};

    fn update(device: &str, kind: PropertyKind) -> Message {
        let element = match kind {
            PropertyKind::Blob => Element::blob("DATA"),
            _ => Element::text("DATA", "x"),
        };
        let property = Property::builder(device, "P", kind)
            .element(element)
            .build()
            .unwrap();
        Message::Set(ValueUpdate::from_property(&property, None))
    }

    #[test]
    fn test_scope_starts_empty() {
        let (session, _rx) = Session::detached("peer", &SessionConfig::default());
        assert!(!session.accepts(&update("Cam", PropertyKind::Text)));
        assert!(!session.accepts(&Message::Message(Notice::new(None, "hi"))));

        session.request_device(Some("Cam"));
        assert!(session.accepts(&update("Cam", PropertyKind::Text)));
        assert!(!session.accepts(&update("Mount", PropertyKind::Text)));
        assert!(session.accepts(&Message::Delete(Deletion::device("Cam"))));

        session.request_device(None);
        assert!(session.accepts(&update("Mount", PropertyKind::Text)));
    }

    #[test]
    fn test_blob_policy_per_device_and_property() {
        let (session, _rx) = Session::detached("peer", &SessionConfig::default());
        session.request_device(None);
        assert!(session.accepts(&update("Cam", PropertyKind::Blob)));

        session.set_blob_policy("Cam", None, BlobPolicy::Never);
        assert!(!session.accepts(&update("Cam", PropertyKind::Blob)));
        assert!(session.accepts(&update("Cam", PropertyKind::Text)));

        session.set_blob_policy("Cam", Some("P"), BlobPolicy::Only);
        assert!(session.accepts(&update("Cam", PropertyKind::Blob)));
        assert!(!session.accepts(&update("Cam", PropertyKind::Text)));
        assert_eq!(session.blob_policy("Other", "P"), BlobPolicy::Also);
    }

    #[test]
    fn test_full_queue_is_slow_consumer() {
        let config = SessionConfig::default().with_outbound_queue_len(1);
        let (session, rx) = Session::detached("peer", &config);
        session.try_send(Bytes::from_static(b"<a/>")).unwrap();
        assert!(matches!(
            session.try_send(Bytes::from_static(b"<b/>")),
            Err(ConnectionError::SlowConsumer(_))
        ));

        drop(rx);
        assert!(session.is_closed());
        assert!(matches!(
            session.try_send(Bytes::from_static(b"<c/>")),
            Err(ConnectionError::Closed)
        ));
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert_ne!(a, b);
        assert!(b.to_string().starts_with("session-"));
    }
}
