//! Client behaviour against a scripted server over an in-memory pipe

use std::sync::Arc;
use std::time::Duration;

use indi_client::{Client, ClientConfig, ClientError, MirrorEvent};
use indi_codec::{
    BlobPolicy, Definition, Deletion, GetProperties, Message, Notice, OneValue, ValueUpdate,
};
use indi_connection::{Connection, MessageReader, MessageWriter, SessionConfig};
use indi_model::prelude::*;
use parking_lot::Mutex;

// ============================================================================
// Helpers
// ============================================================================

struct Server {
    reader: MessageReader,
    writer: MessageWriter,
}

impl Server {
    async fn send(&mut self, message: Message) {
        self.writer.send(&message).await.unwrap();
    }

    async fn next(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(5), self.reader.recv())
            .await
            .expect("timed out waiting for the client")
            .unwrap()
            .expect("client closed the connection")
    }

    async fn is_quiet(&mut self) -> bool {
        tokio::time::timeout(Duration::from_millis(200), self.reader.recv())
            .await
            .is_err()
    }
}

async fn connected(config: ClientConfig) -> (Client, Server) {
    let (client_side, server_side) = Connection::pair(&SessionConfig::default());
    let client = Client::attach(client_side, config).await.unwrap();
    let (reader, writer) = server_side.split();
    (client, Server { reader, writer })
}

fn temperature(perm: Permission) -> Property {
    let spec = NumberSpec::new(NumberFormat::parse("%6.2f").unwrap(), -50.0, 50.0, 0.5);
    Property::builder("Thermostat", "TEMP", PropertyKind::Number)
        .perm(perm)
        .element(Element::number("VALUE", 20.0, spec))
        .build()
        .unwrap()
}

fn temp_update(value: f64, state: State) -> Message {
    let mut property = temperature(Permission::ReadWrite);
    property.apply([("VALUE", Value::Number(value))]).unwrap();
    property.set_state(state);
    Message::Set(ValueUpdate::from_property(&property, None))
}

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_asks_for_properties_on_connect() {
    let (_client, mut server) = connected(ClientConfig::default()).await;
    assert_eq!(server.next().await, Message::GetProperties(GetProperties::all()));

    let (_client, mut server) = connected(ClientConfig::new().with_ask_on_connect(false)).await;
    assert!(server.is_quiet().await);
}

#[tokio::test]
async fn test_mirror_follows_definitions_and_updates() {
    let (client, mut server) = connected(ClientConfig::default()).await;
    server.next().await;

    server
        .send(Message::Define(Definition::new(temperature(Permission::ReadWrite))))
        .await;
    let temp = client
        .wait_for_property("Thermostat", "TEMP", WAIT)
        .await
        .unwrap();
    assert_eq!(temp.value("VALUE"), Some(Value::Number(20.0)));

    server.send(temp_update(18.5, State::Busy)).await;
    client
        .wait_until(WAIT, |mirror| {
            mirror
                .property("Thermostat", "TEMP")
                .is_some_and(|p| p.state() == State::Busy)
        })
        .await
        .unwrap();
    let temp = client.property("Thermostat", "TEMP").unwrap();
    assert_eq!(temp.value("VALUE"), Some(Value::Number(18.5)));
}

#[tokio::test]
async fn test_listeners_see_every_update_in_order() {
    let (client, mut server) = connected(ClientConfig::default()).await;
    server.next().await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    client.on_element("Thermostat", "TEMP", "VALUE", move |_, property| {
        let value = property.and_then(|p| p.value("VALUE")).and_then(|v| v.as_number());
        log.lock().push(value);
    });
    let states = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&states);
    client.on_property("Thermostat", "TEMP", move |event, _| {
        if let MirrorEvent::PropertyUpdated { state, .. } = event {
            log.lock().push(*state);
        }
    });

    server
        .send(Message::Define(Definition::new(temperature(Permission::ReadWrite))))
        .await;
    for (value, state) in [(1.0, State::Busy), (2.0, State::Busy), (2.0, State::Ok)] {
        server.send(temp_update(value, state)).await;
    }
    let observed = Arc::clone(&states);
    client
        .wait_until(WAIT, move |_| observed.lock().len() == 3)
        .await
        .unwrap();

    // The last update changes no value, so the element listener skips it
    assert_eq!(*seen.lock(), vec![Some(20.0), Some(1.0), Some(2.0)]);
    assert_eq!(*states.lock(), vec![State::Busy, State::Busy, State::Ok]);
}

#[tokio::test]
async fn test_read_only_request_fails_without_io() {
    let (client, mut server) = connected(ClientConfig::default()).await;
    server.next().await;
    server
        .send(Message::Define(Definition::new(temperature(Permission::ReadOnly))))
        .await;
    client
        .wait_for_property("Thermostat", "TEMP", WAIT)
        .await
        .unwrap();

    let result = client
        .request("Thermostat", "TEMP")
        .set("VALUE", 10.0)
        .send()
        .await;
    assert!(matches!(result, Err(ClientError::ReadOnly(_))));
    assert!(server.is_quiet().await);
}

#[tokio::test]
async fn test_request_is_one_message() {
    let (client, mut server) = connected(ClientConfig::default()).await;
    server.next().await;
    let mode = Property::builder("Thermostat", "MODE", PropertyKind::Switch)
        .rule(SwitchRule::OneOfMany)
        .element(Element::switch("HEAT", SwitchState::On))
        .element(Element::switch("COOL", SwitchState::Off))
        .build()
        .unwrap();
    server.send(Message::Define(Definition::new(mode))).await;
    client
        .wait_for_property("Thermostat", "MODE", WAIT)
        .await
        .unwrap();

    client
        .request("Thermostat", "MODE")
        .off("HEAT")
        .on("COOL")
        .send()
        .await
        .unwrap();
    let Message::New(request) = server.next().await else {
        panic!("expected a new-value request");
    };
    assert_eq!(request.name, "MODE");
    assert_eq!(
        request.values,
        vec![
            OneValue::new("HEAT", SwitchState::Off),
            OneValue::new("COOL", SwitchState::On),
        ]
    );
    assert!(server.is_quiet().await);
}

#[tokio::test]
async fn test_enable_blob_is_sent() {
    let (client, mut server) = connected(ClientConfig::new().with_ask_on_connect(false)).await;
    client
        .enable_blob("Cam", None, BlobPolicy::Only)
        .await
        .unwrap();
    let Message::EnableBlob(enable) = server.next().await else {
        panic!("expected enableBLOB");
    };
    assert_eq!(enable.device, "Cam");
    assert_eq!(enable.policy, BlobPolicy::Only);
}

#[tokio::test]
async fn test_device_events_reach_iterator_and_subscribers() {
    let (client, mut server) = connected(ClientConfig::default()).await;
    server.next().await;
    let iter = client.iter();
    let mut events = client.subscribe();

    server
        .send(Message::Define(Definition::new(temperature(Permission::ReadWrite))))
        .await;
    server
        .send(Message::Message(Notice::new(
            Some("Thermostat".into()),
            "warming up",
        )))
        .await;
    server
        .send(Message::Delete(Deletion::device("Thermostat")))
        .await;

    let mut received = Vec::new();
    while received.len() < 5 {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .unwrap()
            .unwrap();
        received.push(event);
    }
    let key = PropertyKey::new("Thermostat", "TEMP");
    let expected = vec![
        MirrorEvent::DeviceAppeared {
            device: "Thermostat".into(),
        },
        MirrorEvent::PropertyDefined { key: key.clone() },
        MirrorEvent::Message {
            device: Some("Thermostat".into()),
            text: "warming up".into(),
        },
        MirrorEvent::PropertyRemoved { key },
        MirrorEvent::DeviceRemoved {
            device: "Thermostat".into(),
        },
    ];
    assert_eq!(received, expected);

    let iterated: Vec<MirrorEvent> = iter.try_iter().collect();
    assert_eq!(iterated, expected);
    assert!(client.mirror().is_empty());
}

#[tokio::test]
async fn test_server_hangup_marks_client_closed() {
    let (client, mut server) = connected(ClientConfig::default()).await;
    server.next().await;
    let mut events = client.subscribe();
    drop(server);

    let event = tokio::time::timeout(WAIT, events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, MirrorEvent::Disconnected);
    assert!(client.is_closed());
    assert!(matches!(
        client.get_properties(None, None).await,
        Err(ClientError::Closed)
    ));
}
