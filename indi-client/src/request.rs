//! Accumulate desired element values and send them as one request

use indi_codec::NewValueRequest;
use indi_model::{PropertyKey, SwitchState, Value};

use crate::client::Client;
use crate::error::Result;

/// Desired values for one property, sent as a single `new*Vector`
///
/// Obtained from [`Client::request`]. Setting the same element twice keeps
/// the last value.
///
/// ```rust,ignore
/// client
///     .request("Thermostat", "TEMP")
///     .set("VALUE", 18.5)
///     .send()
///     .await?;
/// ```
#[must_use = "a request does nothing until it is sent"]
pub struct RequestBuilder<'a> {
    client: &'a Client,
    key: PropertyKey,
    values: Vec<(String, Value)>,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a Client, key: PropertyKey) -> Self {
        Self {
            client,
            key,
            values: Vec::new(),
        }
    }

    pub fn key(&self) -> &PropertyKey {
        &self.key
    }

    /// Desired value for one element
    pub fn set(mut self, element: impl Into<String>, value: impl Into<Value>) -> Self {
        let element = element.into();
        let value = value.into();
        match self.values.iter_mut().find(|(name, _)| *name == element) {
            Some(slot) => slot.1 = value,
            None => self.values.push((element, value)),
        }
        self
    }

    /// Turn a switch on
    pub fn on(self, element: impl Into<String>) -> Self {
        self.set(element, SwitchState::On)
    }

    /// Turn a switch off
    pub fn off(self, element: impl Into<String>) -> Self {
        self.set(element, SwitchState::Off)
    }

    /// Values collected so far
    pub fn values(&self) -> &[(String, Value)] {
        &self.values
    }

    /// Validate against the mirror without sending
    pub fn build(&self) -> Result<NewValueRequest> {
        self.client.mirror().prepare_request(&self.key, &self.values)
    }

    /// Validate and send; read-only properties fail here, before any I/O
    pub async fn send(self) -> Result<()> {
        let request = self.build()?;
        self.client.send_request(request).await
    }
}
