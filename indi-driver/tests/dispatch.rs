//! Driver behaviour as seen by a raw protocol peer over an in-memory pipe

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indi_codec::{
    BlobPolicy, EnableBlob, GetProperties, Message, NewValueRequest, OneValue, ValueUpdate,
};
use indi_connection::{Connection, MessageReader, MessageWriter, SessionConfig};
use indi_driver::{
    ConfigStore, Driver, DriverConfig, HandlerError, MemoryConfigStore, PropertyHandle,
};
use indi_model::prelude::*;

// ============================================================================
// Helpers
// ============================================================================

struct Peer {
    reader: MessageReader,
    writer: MessageWriter,
}

impl Peer {
    async fn attach(driver: &Driver, request: GetProperties) -> Self {
        let (server, client) = Connection::pair(&SessionConfig::default());
        driver.attach(server);
        let (reader, writer) = client.split();
        let mut peer = Self { reader, writer };
        peer.send(Message::GetProperties(request)).await;
        peer
    }

    async fn send(&mut self, message: Message) {
        self.writer.send(&message).await.unwrap();
    }

    async fn next(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(5), self.reader.recv())
            .await
            .expect("timed out waiting for the driver")
            .unwrap()
            .expect("driver closed the connection")
    }

    async fn next_update(&mut self) -> ValueUpdate {
        match self.next().await {
            Message::Set(update) => update,
            other => panic!("expected a value update, got {:?}", other),
        }
    }

    async fn expect_definition(&mut self, name: &str) {
        match self.next().await {
            Message::Define(definition) => assert_eq!(definition.property.name(), name),
            other => panic!("expected definition of {}, got {:?}", name, other),
        }
    }

    async fn is_quiet(&mut self) -> bool {
        tokio::time::timeout(Duration::from_millis(200), self.reader.recv())
            .await
            .is_err()
    }
}

fn driver() -> Driver {
    Driver::new(DriverConfig::new("test-driver")).unwrap()
}

fn temperature(device: &str) -> Property {
    let spec = NumberSpec::new(NumberFormat::parse("%6.2f").unwrap(), -50.0, 50.0, 0.5);
    Property::builder(device, "TEMP", PropertyKind::Number)
        .element(Element::number("VALUE", 20.0, spec))
        .build()
        .unwrap()
}

fn set_number(device: &str, name: &str, element: &str, value: f64) -> Message {
    let mut request = NewValueRequest::new(device, name, PropertyKind::Number);
    request.values.push(OneValue::new(element, value));
    Message::New(request)
}

fn number(update: &ValueUpdate, element: &str) -> f64 {
    update
        .values
        .iter()
        .find(|v| v.name == element)
        .and_then(|v| v.value.as_number())
        .unwrap()
}

// ============================================================================
// Discovery and plain requests
// ============================================================================

#[tokio::test]
async fn test_get_properties_returns_definitions() {
    let driver = driver();
    driver.define(temperature("Thermostat")).unwrap();
    let hidden = driver.register(temperature("Hidden")).unwrap();

    let mut peer = Peer::attach(&driver, GetProperties::all()).await;
    let Message::Define(definition) = peer.next().await else {
        panic!("expected a definition");
    };
    assert_eq!(definition.property.key(), PropertyKey::new("Thermostat", "TEMP"));
    assert_eq!(definition.property.value("VALUE"), Some(Value::Number(20.0)));
    assert!(!hidden.is_defined());
    assert!(peer.is_quiet().await);
}

#[tokio::test]
async fn test_request_without_handler_is_stored_and_published() {
    let driver = driver();
    let temp = driver.define(temperature("Thermostat")).unwrap();
    let mut peer = Peer::attach(&driver, GetProperties::all()).await;
    peer.expect_definition("TEMP").await;

    peer.send(set_number("Thermostat", "TEMP", "VALUE", 18.5)).await;
    let update = peer.next_update().await;
    assert_eq!(update.state, Some(State::Ok));
    assert_eq!(number(&update, "VALUE"), 18.5);
    assert_eq!(temp.value("VALUE"), Some(Value::Number(18.5)));
}

#[tokio::test]
async fn test_out_of_range_request_is_rejected() {
    let driver = driver();
    let calls = Arc::new(AtomicUsize::new(0));
    let temp = driver.define(temperature("Thermostat")).unwrap();
    let counter = Arc::clone(&calls);
    temp.on_request(move |ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        ctx.apply()?;
        Ok(())
    });
    let mut peer = Peer::attach(&driver, GetProperties::all()).await;
    peer.expect_definition("TEMP").await;

    peer.send(set_number("Thermostat", "TEMP", "VALUE", 80.0)).await;
    let update = peer.next_update().await;
    assert_eq!(update.state, Some(State::Alert));
    assert!(update.message.is_some());
    assert_eq!(number(&update, "VALUE"), 20.0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_read_only_request_never_reaches_handler() {
    let driver = driver();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut property = temperature("Thermostat");
    property.set_perm(Permission::ReadOnly).unwrap();
    let temp = driver.define(property).unwrap();
    let counter = Arc::clone(&calls);
    temp.on_request(move |_ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let mut peer = Peer::attach(&driver, GetProperties::all()).await;
    peer.expect_definition("TEMP").await;

    peer.send(set_number("Thermostat", "TEMP", "VALUE", 10.0)).await;
    let update = peer.next_update().await;
    assert_eq!(update.state, Some(State::Alert));
    assert_eq!(number(&update, "VALUE"), 20.0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_handler_failure_publishes_alert() {
    let driver = driver();
    let temp = driver.define(temperature("Thermostat")).unwrap();
    temp.on_request(|_ctx| Err(HandlerError::new("sensor offline")));
    let mut peer = Peer::attach(&driver, GetProperties::all()).await;
    peer.expect_definition("TEMP").await;

    peer.send(set_number("Thermostat", "TEMP", "VALUE", 10.0)).await;
    let update = peer.next_update().await;
    assert_eq!(update.state, Some(State::Alert));
    assert_eq!(update.message.as_deref(), Some("sensor offline"));

    // The session survives a failed handler
    peer.send(Message::GetProperties(GetProperties::property("Thermostat", "TEMP")))
        .await;
    peer.expect_definition("TEMP").await;
}

#[tokio::test]
async fn test_removed_property_drops_requests() {
    let driver = driver();
    let temp = driver.define(temperature("Thermostat")).unwrap();
    let mut peer = Peer::attach(&driver, GetProperties::all()).await;
    peer.expect_definition("TEMP").await;

    temp.remove().unwrap();
    let Message::Delete(deletion) = peer.next().await else {
        panic!("expected a deletion");
    };
    assert_eq!(deletion.name.as_deref(), Some("TEMP"));

    peer.send(set_number("Thermostat", "TEMP", "VALUE", 10.0)).await;
    peer.send(set_number("Thermostat", "NOPE", "VALUE", 10.0)).await;
    assert!(peer.is_quiet().await);
    assert_eq!(temp.value("VALUE"), Some(Value::Number(20.0)));
}

// ============================================================================
// Session scope and BLOB policy
// ============================================================================

#[tokio::test]
async fn test_session_only_hears_requested_devices() {
    let driver = driver();
    let a = driver.define(temperature("A")).unwrap();
    let b = driver.define(temperature("B")).unwrap();
    let mut peer = Peer::attach(&driver, GetProperties::device("A")).await;
    peer.expect_definition("TEMP").await;

    b.update([("VALUE", Value::Number(1.0))], State::Ok, None).unwrap();
    a.update([("VALUE", Value::Number(2.0))], State::Ok, None).unwrap();
    let update = peer.next_update().await;
    assert_eq!(update.device, "A");
    assert_eq!(number(&update, "VALUE"), 2.0);
}

#[tokio::test]
async fn test_blob_policy_filters_updates() {
    let driver = driver();
    let image: PropertyHandle = driver
        .define(
            Property::builder("Cam", "IMAGE", PropertyKind::Blob)
                .perm(Permission::ReadOnly)
                .element(Element::blob("CCD1"))
                .build()
                .unwrap(),
        )
        .unwrap();
    let temp = driver.define(temperature("Cam")).unwrap();
    let mut peer = Peer::attach(&driver, GetProperties::device("Cam")).await;
    peer.expect_definition("IMAGE").await;
    peer.expect_definition("TEMP").await;

    peer.send(Message::EnableBlob(EnableBlob {
        device: "Cam".into(),
        name: None,
        policy: BlobPolicy::Never,
    }))
    .await;
    // Round trip so the policy is known to be in place
    peer.send(Message::GetProperties(GetProperties::property("Cam", "TEMP")))
        .await;
    peer.expect_definition("TEMP").await;

    let frame = Blob::new(".fits", vec![7u8; 256]);
    image
        .update([("CCD1", Value::Blob(frame))], State::Ok, None)
        .unwrap();
    temp.update([("VALUE", Value::Number(5.0))], State::Ok, None)
        .unwrap();

    let update = peer.next_update().await;
    assert_eq!(update.name, "TEMP");
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_saveable_values_survive_restart() {
    let store = Arc::new(MemoryConfigStore::new());
    let saveable = || {
        let mut property = temperature("Thermostat");
        property.set_saveable(true);
        property
    };

    let first = Driver::with_store(DriverConfig::new("thermo"), store.clone()).unwrap();
    let temp = first.define(saveable()).unwrap();
    temp.update([("VALUE", Value::Number(-12.5))], State::Busy, None)
        .unwrap();
    assert!(store.load("Thermostat", "TEMP").unwrap().is_none());
    temp.update([("VALUE", Value::Number(-12.5))], State::Ok, None)
        .unwrap();
    assert!(store.load("Thermostat", "TEMP").unwrap().is_some());
    drop(first);

    let second = Driver::with_store(DriverConfig::new("thermo"), store).unwrap();
    let restored = second.register(saveable()).unwrap();
    assert_eq!(restored.value("VALUE"), Some(Value::Number(-12.5)));
}

#[test]
fn test_duplicate_registration_is_rejected() {
    let driver = driver();
    driver.register(temperature("Thermostat")).unwrap();
    assert!(driver.register(temperature("Thermostat")).is_err());
    assert_eq!(driver.keys().len(), 1);
}
