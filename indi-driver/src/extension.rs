//! Reusable groups of properties
//!
//! An [`Extension`] contributes a set of properties and their handlers to a
//! device. The same extension can be attached several times under different
//! [`Naming`]s, so two camera chips sharing one property layout end up as
//! `CCD1_EXPOSURE` and `CCD2_EXPOSURE` on the wire. An extension may require
//! a [`Capability`] of the device; when the device lacks it, an optional
//! extension stays inactive (registers nothing) and a required one fails
//! when it is attached.
//!
//! Extension properties are registered when the extension is attached,
//! defined when the device connects and removed when it disconnects.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use indi_model::Property;

use crate::device::DeviceHandle;
use crate::error::{DriverError, ExtensionError, HandlerError};
use crate::handler::{RequestHandler, UpdateContext};
use crate::registry::PropertyHandle;

// ============================================================================
// Capabilities
// ============================================================================

/// Something a device can do that extensions may depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capability(&'static str);

impl Capability {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// The capabilities a device declares
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(HashSet<Capability>);

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    pub fn contains(&self, capability: &Capability) -> bool {
        self.0.contains(capability)
    }
}

/// What happens when the device lacks a required capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Attach as an inactive extension
    Optional,
    /// Refuse to attach
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    pub capability: Capability,
    pub gate: Gate,
}

impl Requirement {
    pub fn optional(capability: Capability) -> Self {
        Self {
            capability,
            gate: Gate::Optional,
        }
    }

    pub fn required(capability: Capability) -> Self {
        Self {
            capability,
            gate: Gate::Required,
        }
    }
}

// ============================================================================
// Naming
// ============================================================================

/// How one extension instance names its properties and elements
///
/// Explicit property renames win over the prefix. Element renames are keyed
/// by the property's original name and applied all at once, so two
/// elements can swap names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Naming {
    prefix: String,
    properties: HashMap<String, String>,
    elements: Vec<ElementRename>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ElementRename {
    property: String,
    from: String,
    to: String,
}

impl Naming {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self::new().with_prefix(prefix)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn rename_property(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.properties.insert(from.into(), to.into());
        self
    }

    pub fn rename_element(
        mut self,
        property: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        let (property, from, to) = (property.into(), from.into(), to.into());
        match self
            .elements
            .iter_mut()
            .find(|r| r.property == property && r.from == from)
        {
            Some(rename) => rename.to = to,
            None => self.elements.push(ElementRename { property, from, to }),
        }
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Wire name of the property originally called `base`
    pub fn property_name(&self, base: &str) -> String {
        self.properties
            .get(base)
            .cloned()
            .unwrap_or_else(|| format!("{}{}", self.prefix, base))
    }

    /// Wire name of `element` inside the property originally called
    /// `property`
    pub fn element_name(&self, property: &str, element: &str) -> String {
        self.elements
            .iter()
            .find(|r| r.property == property && r.from == element)
            .map_or_else(|| element.to_string(), |r| r.to.clone())
    }

    /// Rename a property prototype for this instance
    pub(crate) fn apply(&self, extension: &str, property: &mut Property) -> Result<(), ExtensionError> {
        let base = property.name().to_string();
        let model = |source| ExtensionError::Property {
            extension: extension.to_string(),
            source,
        };

        let renames: Vec<&ElementRename> =
            self.elements.iter().filter(|r| r.property == base).collect();
        if let Some(missing) = renames.iter().find(|r| property.element(&r.from).is_none()) {
            return Err(ExtensionError::UnknownRename {
                extension: extension.to_string(),
                property: base.clone(),
                element: missing.from.clone(),
            });
        }
        // Park every renamed element first so targets may reuse freed names
        for (i, rename) in renames.iter().enumerate() {
            property
                .rename_element(&rename.from, parked_name(i))
                .map_err(model)?;
        }
        for (i, rename) in renames.iter().enumerate() {
            property
                .rename_element(&parked_name(i), rename.to.clone())
                .map_err(model)?;
        }
        property.rename(self.property_name(&base)).map_err(model)?;
        Ok(())
    }
}

fn parked_name(i: usize) -> String {
    format!("\u{0}rename-{}", i)
}

// ============================================================================
// Extension trait
// ============================================================================

/// A reusable group of properties attached to a device
pub trait Extension: Send + Sync + 'static {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Capability the device must have for this extension to be active
    fn requirement(&self) -> Option<Requirement> {
        None
    }

    /// Register the extension's properties and install their handlers
    ///
    /// Called once per attached instance, and only for active instances.
    fn build(&self, builder: &mut ExtensionBuilder<'_>) -> Result<(), ExtensionError>;

    /// Runs after the instance's properties have been defined on connect
    fn on_connect(&self, _device: &DeviceHandle, _naming: &Naming) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Runs before the instance's properties are removed on disconnect
    fn on_disconnect(&self, _device: &DeviceHandle, _naming: &Naming) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Registration surface handed to [`Extension::build`]
pub struct ExtensionBuilder<'a> {
    device: &'a DeviceHandle,
    extension: &'a str,
    naming: &'a Naming,
    registered: Vec<(String, PropertyHandle)>,
}

impl<'a> ExtensionBuilder<'a> {
    pub(crate) fn new(device: &'a DeviceHandle, extension: &'a str, naming: &'a Naming) -> Self {
        Self {
            device,
            extension,
            naming,
            registered: Vec::new(),
        }
    }

    pub fn device(&self) -> &DeviceHandle {
        self.device
    }

    pub fn naming(&self) -> &Naming {
        self.naming
    }

    /// Register a property under this instance's naming
    ///
    /// The property is moved to the device and renamed. A name that is
    /// already taken on the device is a collision.
    pub fn property(&mut self, mut property: Property) -> Result<PropertyHandle, ExtensionError> {
        let base = property.name().to_string();
        self.naming.apply(self.extension, &mut property)?;
        property
            .set_device(self.device.name())
            .map_err(|source| ExtensionError::Property {
                extension: self.extension.to_string(),
                source,
            })?;

        let handle = self
            .device
            .register(property)
            .map_err(|e| match e {
                DriverError::AlreadyRegistered(property) => ExtensionError::NameCollision {
                    extension: self.extension.to_string(),
                    property,
                },
                other => ExtensionError::Registration {
                    extension: self.extension.to_string(),
                    reason: other.to_string(),
                },
            })?;
        self.registered.push((base, handle.clone()));
        Ok(handle)
    }

    /// Handle of a property registered earlier in this build, by its
    /// original name
    pub fn get(&self, base: &str) -> Option<&PropertyHandle> {
        self.registered
            .iter()
            .find(|(name, _)| name == base)
            .map(|(_, handle)| handle)
    }

    pub(crate) fn finish(self) -> Vec<PropertyHandle> {
        self.registered.into_iter().map(|(_, handle)| handle).collect()
    }
}

// ============================================================================
// Template extension
// ============================================================================

/// Extension assembled from property prototypes and handlers
///
/// Cloning a template and attaching it under another [`Naming`] is how a
/// driver hosts several identical units.
#[derive(Clone)]
pub struct TemplateExtension {
    name: String,
    requirement: Option<Requirement>,
    properties: Vec<Property>,
    handlers: HashMap<String, RequestHandler>,
}

impl TemplateExtension {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requirement: None,
            properties: Vec::new(),
            handlers: HashMap::new(),
        }
    }

    pub fn requires(mut self, requirement: Requirement) -> Self {
        self.requirement = Some(requirement);
        self
    }

    /// Add a property prototype; its device is replaced on attachment
    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Handler for the prototype originally called `property`
    pub fn handler<F>(mut self, property: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut UpdateContext<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.handlers.insert(property.into(), Arc::new(handler));
        self
    }
}

impl Extension for TemplateExtension {
    fn name(&self) -> &str {
        &self.name
    }

    fn requirement(&self) -> Option<Requirement> {
        self.requirement
    }

    fn build(&self, builder: &mut ExtensionBuilder<'_>) -> Result<(), ExtensionError> {
        for prototype in &self.properties {
            let handle = builder.property(prototype.clone())?;
            if let Some(handler) = self.handlers.get(prototype.name()) {
                handle.set_handler(Arc::clone(handler));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for TemplateExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateExtension")
            .field("name", &self.name)
            .field("properties", &self.properties.len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
