//! Request handlers and the context they run in
//!
//! A handler is a plain closure stored on a property. The dispatcher calls
//! it with an [`UpdateContext`] after the request has been validated, so the
//! handler only sees values that satisfy the element ranges and the switch
//! rule. At most one handler call per property is in flight at a time.
//!
//! Handlers must return promptly. Long operations report Busy from the
//! handler and finish later through a [`PropertyHandle`] moved into a
//! background task:
//!
//! ```rust,ignore
//! exposure.on_request(|ctx| {
//!     ctx.apply()?;
//!     ctx.set_state(State::Busy);
//!     ctx.publish(Some("exposing"));
//!     let handle = ctx.handle();
//!     tokio::spawn(async move {
//!         tokio::time::sleep(Duration::from_secs(2)).await;
//!         let _ = handle.update([("EXPOSURE", Value::Number(0.0))], State::Ok, None);
//!     });
//!     Ok(())
//! });
//! ```

use std::sync::Arc;

use indi_model::{Property, PropertyKey, State, SwitchState, Value};

use crate::error::HandlerError;
use crate::registry::{Driver, PropertyHandle, PropertySlot};

/// Callback invoked for each validated request against one property
pub type RequestHandler =
    Arc<dyn Fn(&mut UpdateContext<'_>) -> Result<(), HandlerError> + Send + Sync>;

/// What a handler can see and do while it runs
///
/// The property is locked for the duration of the call. Use the
/// context's own methods to change it; calling back into the
/// [`PropertyHandle`] of the same property from inside the handler would
/// wait on that lock forever.
///
/// If the handler returns `Ok` without publishing, the current state and
/// values are published on its behalf. If it returns `Err`, the property
/// goes to Alert and the error text is published with it.
pub struct UpdateContext<'a> {
    driver: &'a Driver,
    slot: &'a Arc<PropertySlot>,
    property: &'a mut Property,
    requested: Vec<(String, Value)>,
    published: bool,
}

impl<'a> UpdateContext<'a> {
    pub(crate) fn new(
        driver: &'a Driver,
        slot: &'a Arc<PropertySlot>,
        property: &'a mut Property,
        requested: Vec<(String, Value)>,
    ) -> Self {
        Self {
            driver,
            slot,
            property,
            requested,
            published: false,
        }
    }

    pub fn property(&self) -> &Property {
        &*self.property
    }

    pub fn key(&self) -> PropertyKey {
        self.property.key()
    }

    pub fn driver(&self) -> &Driver {
        self.driver
    }

    /// Validated values the client asked for
    ///
    /// For switches this is the resolved selection: turning one switch of a
    /// OneOfMany property on also lists the switch it turns off.
    pub fn requested(&self) -> &[(String, Value)] {
        &self.requested
    }

    pub fn requested_value(&self, element: &str) -> Option<&Value> {
        self.requested
            .iter()
            .find(|(name, _)| name == element)
            .map(|(_, value)| value)
    }

    pub fn requested_number(&self, element: &str) -> Option<f64> {
        self.requested_value(element).and_then(Value::as_number)
    }

    /// Whether the request leaves `element` switched on
    pub fn requested_on(&self, element: &str) -> bool {
        self.requested_value(element).and_then(Value::as_switch) == Some(SwitchState::On)
    }

    /// Store the requested values
    pub fn apply(&mut self) -> Result<Vec<String>, HandlerError> {
        let requested = self.requested.clone();
        Ok(self.property.apply(requested)?)
    }

    /// Store other values than the ones requested
    pub fn apply_values<N, I>(&mut self, values: I) -> Result<Vec<String>, HandlerError>
    where
        N: AsRef<str>,
        I: IntoIterator<Item = (N, Value)>,
    {
        Ok(self.property.apply(values)?)
    }

    pub fn set_state(&mut self, state: State) {
        self.property.set_state(state);
    }

    /// Broadcast the current state and values now
    pub fn publish(&mut self, message: Option<&str>) {
        self.driver.publish(self.slot, &*self.property, message);
        self.published = true;
    }

    /// Handle for finishing the operation after the handler has returned
    pub fn handle(&self) -> PropertyHandle {
        PropertyHandle::new(self.driver.downgrade(), Arc::clone(self.slot))
    }

    pub(crate) fn is_published(&self) -> bool {
        self.published
    }
}
