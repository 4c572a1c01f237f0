//! Properties: named, typed vectors of elements
//!
//! A [`Property`] is identified by its `(device, name)` pair and holds an
//! ordered list of elements of a single kind. Metadata and membership can be
//! edited freely until the property is frozen, which happens when it is
//! first broadcast. From then on only the state and the element values
//! change.
//!
//! Value changes go through [`Property::apply`], which validates the whole
//! batch before touching anything: a batch is applied completely or not at
//! all.

use std::collections::HashMap;
use std::fmt;

use crate::element::Element;
use crate::error::{ModelError, Result};
use crate::state::{Permission, PropertyKind, State, SwitchRule, SwitchState};
use crate::switch;
use crate::value::Value;

/// Identity of a property within a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyKey {
    pub device: String,
    pub name: String,
}

impl PropertyKey {
    pub fn new(device: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.device, self.name)
    }
}

/// A named vector of elements owned by one device
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    device: String,
    name: String,
    label: String,
    group: String,
    kind: PropertyKind,
    perm: Permission,
    state: State,
    timeout: f64,
    rule: Option<SwitchRule>,
    elements: Vec<Element>,
    index: HashMap<String, usize>,
    frozen: bool,
    saveable: bool,
}

impl Property {
    /// An empty property of the given kind
    ///
    /// Switch vectors start with the `OneOfMany` rule and lights are always
    /// read-only.
    pub fn new(device: impl Into<String>, name: impl Into<String>, kind: PropertyKind) -> Self {
        let name = name.into();
        Self {
            device: device.into(),
            label: name.clone(),
            name,
            group: String::new(),
            kind,
            perm: if kind == PropertyKind::Light {
                Permission::ReadOnly
            } else {
                Permission::default()
            },
            state: State::Idle,
            timeout: 0.0,
            rule: (kind == PropertyKind::Switch).then_some(SwitchRule::default()),
            elements: Vec::new(),
            index: HashMap::new(),
            frozen: false,
            saveable: false,
        }
    }

    /// Start a builder for a property of the given kind
    pub fn builder(
        device: impl Into<String>,
        name: impl Into<String>,
        kind: PropertyKind,
    ) -> PropertyBuilder {
        PropertyBuilder {
            property: Property::new(device, name, kind),
            pending: Vec::new(),
            rule: None,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn key(&self) -> PropertyKey {
        PropertyKey::new(&self.device, &self.name)
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    pub fn perm(&self) -> Permission {
        self.perm
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Advisory client timeout in seconds; never enforced
    pub fn timeout(&self) -> f64 {
        self.timeout
    }

    /// Selection rule; `Some` exactly for switch vectors
    pub fn rule(&self) -> Option<SwitchRule> {
        self.rule
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Whether values are persisted across driver restarts
    pub fn is_saveable(&self) -> bool {
        self.saveable
    }

    /// Elements in definition order
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn element(&self, name: &str) -> Option<&Element> {
        self.index.get(name).map(|&i| &self.elements[i])
    }

    pub fn value(&self, element: &str) -> Option<Value> {
        self.element(element).map(Element::value)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Names of the switches currently on
    pub fn switches_on(&self) -> Vec<&str> {
        self.elements
            .iter()
            .filter(|e| e.value().as_switch().is_some_and(|s| s.is_on()))
            .map(Element::name)
            .collect()
    }

    // ========================================================================
    // Construction-time mutation
    // ========================================================================

    /// Append an element; rejected once frozen, on kind mismatch or on a
    /// duplicate name
    pub fn add_element(&mut self, element: Element) -> Result<()> {
        self.ensure_mutable()?;
        if element.kind() != self.kind {
            return Err(ModelError::KindMismatch {
                property: self.name.clone(),
                expected: self.kind,
                found: element.kind(),
            });
        }
        if self.index.contains_key(element.name()) {
            return Err(ModelError::DuplicateElement {
                property: self.name.clone(),
                element: element.name().to_string(),
            });
        }
        self.index
            .insert(element.name().to_string(), self.elements.len());
        self.elements.push(element);
        Ok(())
    }

    pub fn set_label(&mut self, label: impl Into<String>) -> Result<()> {
        self.ensure_mutable()?;
        self.label = label.into();
        Ok(())
    }

    pub fn set_group(&mut self, group: impl Into<String>) -> Result<()> {
        self.ensure_mutable()?;
        self.group = group.into();
        Ok(())
    }

    pub fn set_perm(&mut self, perm: Permission) -> Result<()> {
        self.ensure_mutable()?;
        if self.kind != PropertyKind::Light {
            self.perm = perm;
        }
        Ok(())
    }

    pub fn set_rule(&mut self, rule: SwitchRule) -> Result<()> {
        self.ensure_mutable()?;
        if self.kind != PropertyKind::Switch {
            return Err(ModelError::RuleOnNonSwitch(self.name.clone()));
        }
        self.rule = Some(rule);
        Ok(())
    }

    pub fn set_saveable(&mut self, saveable: bool) {
        self.saveable = saveable;
    }

    /// The advisory timeout is metadata and may be updated with any publish
    pub fn set_timeout(&mut self, timeout: f64) {
        self.timeout = timeout;
    }

    pub fn set_state(&mut self, state: State) {
        self.state = state;
    }

    /// Move the property to another device
    pub fn set_device(&mut self, device: impl Into<String>) -> Result<()> {
        self.ensure_mutable()?;
        self.device = device.into();
        Ok(())
    }

    /// Rename the property; the label follows when it was still the default
    pub fn rename(&mut self, name: impl Into<String>) -> Result<()> {
        self.ensure_mutable()?;
        let name = name.into();
        if self.label == self.name {
            self.label = name.clone();
        }
        self.name = name;
        Ok(())
    }

    /// Rename one element, keeping its position
    pub fn rename_element(&mut self, from: &str, to: impl Into<String>) -> Result<()> {
        self.ensure_mutable()?;
        let to = to.into();
        let index = self.lookup(from)?;
        if from != to && self.index.contains_key(&to) {
            return Err(ModelError::DuplicateElement {
                property: self.name.clone(),
                element: to,
            });
        }
        self.index.remove(from);
        self.index.insert(to.clone(), index);
        let element = self.elements[index].clone();
        self.elements[index] = element.renamed(to);
        Ok(())
    }

    /// Fix the element set; called when the property is first broadcast
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.frozen {
            Err(ModelError::Frozen(self.name.clone()))
        } else {
            Ok(())
        }
    }

    fn lookup(&self, element: &str) -> Result<usize> {
        self.index
            .get(element)
            .copied()
            .ok_or_else(|| ModelError::UnknownElement {
                property: self.name.clone(),
                element: element.to_string(),
            })
    }

    // ========================================================================
    // Value updates
    // ========================================================================

    /// Validate a partial assignment and expand it to the values that
    /// applying it would store
    ///
    /// Unknown elements, kind mismatches and out-of-range numbers are
    /// rejected. Switch requests are resolved against the selection rule,
    /// so the result may name switches the request left out. Nothing is
    /// mutated.
    pub fn resolve<N, I>(&self, values: I) -> Result<Vec<(String, Value)>>
    where
        N: AsRef<str>,
        I: IntoIterator<Item = (N, Value)>,
    {
        let mut checked: Vec<(usize, Value)> = Vec::new();
        for (name, value) in values {
            let index = self.lookup(name.as_ref())?;
            self.elements[index].check(&value)?;
            checked.push((index, value));
        }

        if let Some(rule) = self.rule {
            let current: Vec<SwitchState> = self
                .elements
                .iter()
                .map(|e| e.value().as_switch().unwrap_or_default())
                .collect();
            let requested: Vec<(usize, SwitchState)> = checked
                .iter()
                .filter_map(|(i, v)| v.as_switch().map(|s| (*i, s)))
                .collect();
            let resolved = switch::resolve(&self.name, rule, &current, &requested)?;
            return Ok(self
                .elements
                .iter()
                .zip(resolved)
                .zip(current)
                .enumerate()
                .filter(|(i, ((_, new), old))| {
                    new != old || checked.iter().any(|(c, _)| c == i)
                })
                .map(|(_, ((e, new), _))| (e.name().to_string(), Value::Switch(new)))
                .collect());
        }

        // Later entries for the same element win
        let mut resolved: Vec<(String, Value)> = Vec::with_capacity(checked.len());
        for (index, value) in checked {
            let name = self.elements[index].name();
            match resolved.iter_mut().find(|(n, _)| n == name) {
                Some(slot) => slot.1 = value,
                None => resolved.push((name.to_string(), value)),
            }
        }
        Ok(resolved)
    }

    /// Apply a partial assignment atomically
    ///
    /// Returns the names of the elements whose value actually changed, in
    /// definition order. On error the property is left untouched.
    pub fn apply<N, I>(&mut self, values: I) -> Result<Vec<String>>
    where
        N: AsRef<str>,
        I: IntoIterator<Item = (N, Value)>,
    {
        let resolved = self.resolve(values)?;
        let mut changed = vec![false; self.elements.len()];
        for (name, value) in resolved {
            let index = self.lookup(&name)?;
            changed[index] |= self.elements[index].set(value)?;
        }
        Ok(self.changed_names(&changed))
    }

    /// Store values as reported by the owning side
    ///
    /// Only names and kinds are checked; ranges and switch rules are the
    /// owner's business. Still atomic.
    pub fn merge<N, I>(&mut self, values: I) -> Result<Vec<String>>
    where
        N: AsRef<str>,
        I: IntoIterator<Item = (N, Value)>,
    {
        let mut checked = Vec::new();
        for (name, value) in values {
            let index = self.lookup(name.as_ref())?;
            let expected = self.elements[index].kind();
            if expected != value.kind() {
                return Err(ModelError::KindMismatch {
                    property: self.name.clone(),
                    expected,
                    found: value.kind(),
                });
            }
            checked.push((index, value));
        }
        let mut changed = vec![false; self.elements.len()];
        for (index, value) in checked {
            changed[index] |= self.elements[index].replace(value)?;
        }
        Ok(self.changed_names(&changed))
    }

    fn changed_names(&self, changed: &[bool]) -> Vec<String> {
        self.elements
            .iter()
            .zip(changed)
            .filter(|(_, c)| **c)
            .map(|(e, _)| e.name().to_string())
            .collect()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Fluent construction of a [`Property`]
///
/// Errors (duplicate names, mismatched kinds, a rule on a non-switch) are
/// collected and reported by [`PropertyBuilder::build`].
#[derive(Debug)]
pub struct PropertyBuilder {
    property: Property,
    pending: Vec<Element>,
    rule: Option<SwitchRule>,
}

impl PropertyBuilder {
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.property.label = label.into();
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.property.group = group.into();
        self
    }

    pub fn perm(mut self, perm: Permission) -> Self {
        if self.property.kind != PropertyKind::Light {
            self.property.perm = perm;
        }
        self
    }

    pub fn state(mut self, state: State) -> Self {
        self.property.state = state;
        self
    }

    pub fn timeout(mut self, timeout: f64) -> Self {
        self.property.timeout = timeout;
        self
    }

    pub fn rule(mut self, rule: SwitchRule) -> Self {
        self.rule = Some(rule);
        self
    }

    pub fn saveable(mut self, saveable: bool) -> Self {
        self.property.saveable = saveable;
        self
    }

    pub fn element(mut self, element: Element) -> Self {
        self.pending.push(element);
        self
    }

    pub fn elements(mut self, elements: impl IntoIterator<Item = Element>) -> Self {
        self.pending.extend(elements);
        self
    }

    pub fn build(self) -> Result<Property> {
        let mut property = self.property;
        if let Some(rule) = self.rule {
            property.set_rule(rule)?;
        }
        for element in self.pending {
            property.add_element(element)?;
        }
        Ok(property)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::NumberSpec;
    use crate::format::NumberFormat;

    fn mode() -> Property {
        Property::builder("Sim", "MODE", PropertyKind::Switch)
            .label("Mode")
            .rule(SwitchRule::OneOfMany)
            .element(Element::switch("A", SwitchState::On))
            .element(Element::switch("B", SwitchState::Off))
            .element(Element::switch("C", SwitchState::Off))
            .build()
            .unwrap()
    }

    fn coords() -> Property {
        let spec = NumberSpec::new(NumberFormat::parse("%10.6m").unwrap(), 0.0, 24.0, 0.0);
        let dec = NumberSpec::new(NumberFormat::parse("%10.6m").unwrap(), -90.0, 90.0, 0.0);
        Property::builder("Scope", "EQUATORIAL_EOD_COORD", PropertyKind::Number)
            .element(Element::number("RA", 0.0, spec))
            .element(Element::number("DEC", 0.0, dec))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_duplicates_and_mismatches() {
        let err = Property::builder("Sim", "P", PropertyKind::Text)
            .element(Element::text("A", ""))
            .element(Element::text("A", ""))
            .build()
            .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateElement { .. }));

        let err = Property::builder("Sim", "P", PropertyKind::Text)
            .element(Element::switch("A", SwitchState::On))
            .build()
            .unwrap_err();
        assert!(matches!(err, ModelError::KindMismatch { .. }));

        let err = Property::builder("Sim", "P", PropertyKind::Text)
            .rule(SwitchRule::AnyOfMany)
            .build()
            .unwrap_err();
        assert_eq!(err, ModelError::RuleOnNonSwitch("P".to_string()));
    }

    #[test]
    fn test_empty_property_is_legal_and_grows() {
        let mut property = Property::new("Sim", "INFO", PropertyKind::Text);
        assert!(property.is_empty());
        property.add_element(Element::text("VERSION", "1.0")).unwrap();
        property.add_element(Element::text("AUTHOR", "me")).unwrap();
        let names: Vec<_> = property.elements().iter().map(Element::name).collect();
        assert_eq!(names, vec!["VERSION", "AUTHOR"]);
    }

    #[test]
    fn test_frozen_property_keeps_membership() {
        let mut property = mode();
        property.freeze();
        assert_eq!(
            property.add_element(Element::switch("D", SwitchState::Off)),
            Err(ModelError::Frozen("MODE".to_string()))
        );
        assert!(property.rename_element("A", "X").is_err());
        assert!(property.apply([("B", Value::Switch(SwitchState::On))]).is_ok());
    }

    #[test]
    fn test_light_is_always_read_only() {
        let property = Property::builder("Sim", "STATUS", PropertyKind::Light)
            .perm(Permission::ReadWrite)
            .build()
            .unwrap();
        assert_eq!(property.perm(), Permission::ReadOnly);
        assert_eq!(property.rule(), None);
    }

    #[test]
    fn test_apply_switch_selects_one() {
        let mut property = mode();
        let changed = property
            .apply([("B", Value::Switch(SwitchState::On))])
            .unwrap();
        assert_eq!(changed, vec!["A", "B"]);
        assert_eq!(property.switches_on(), vec!["B"]);
    }

    #[test]
    fn test_apply_switch_violation_leaves_state() {
        let mut property = mode();
        property
            .apply([("B", Value::Switch(SwitchState::On))])
            .unwrap();
        let err = property
            .apply([
                ("A", Value::Switch(SwitchState::Off)),
                ("B", Value::Switch(SwitchState::Off)),
                ("C", Value::Switch(SwitchState::Off)),
            ])
            .unwrap_err();
        assert!(matches!(err, ModelError::SwitchRule { .. }));
        assert_eq!(property.switches_on(), vec!["B"]);
    }

    #[test]
    fn test_apply_is_atomic() {
        let mut property = coords();
        let err = property
            .apply([("RA", Value::Number(5.5)), ("DEC", Value::Number(120.0))])
            .unwrap_err();
        assert!(matches!(err, ModelError::OutOfRange { .. }));
        assert_eq!(property.value("RA"), Some(Value::Number(0.0)));

        let err = property
            .apply([("RA", Value::Number(5.5)), ("ALT", Value::Number(1.0))])
            .unwrap_err();
        assert!(matches!(err, ModelError::UnknownElement { .. }));
        assert_eq!(property.value("RA"), Some(Value::Number(0.0)));
    }

    #[test]
    fn test_apply_reports_only_changes() {
        let mut property = coords();
        let changed = property
            .apply([("RA", Value::Number(0.0)), ("DEC", Value::Number(-12.0))])
            .unwrap();
        assert_eq!(changed, vec!["DEC"]);
    }

    #[test]
    fn test_resolve_expands_switch_requests() {
        let property = mode();
        let resolved = property
            .resolve([("C", Value::Switch(SwitchState::On))])
            .unwrap();
        assert_eq!(
            resolved,
            vec![
                ("A".to_string(), Value::Switch(SwitchState::Off)),
                ("C".to_string(), Value::Switch(SwitchState::On)),
            ]
        );
    }

    #[test]
    fn test_merge_skips_range_and_rule_checks() {
        let mut property = mode();
        let changed = property
            .merge([
                ("B", Value::Switch(SwitchState::On)),
                ("C", Value::Switch(SwitchState::On)),
            ])
            .unwrap();
        assert_eq!(changed, vec!["B", "C"]);
        assert_eq!(property.switches_on(), vec!["A", "B", "C"]);

        let err = property.merge([("A", Value::Number(1.0))]).unwrap_err();
        assert!(matches!(err, ModelError::KindMismatch { .. }));
    }

    #[test]
    fn test_rename_element_keeps_position() {
        let mut property = coords();
        property.rename("CCD1_COORD").unwrap();
        property.rename_element("RA", "CCD1_RA").unwrap();
        assert_eq!(property.label(), "CCD1_COORD");
        assert_eq!(property.elements()[0].name(), "CCD1_RA");
        assert!(property.element("RA").is_none());
        assert!(property.element("CCD1_RA").is_some());
        assert!(property.rename_element("DEC", "CCD1_RA").is_err());
    }
}
