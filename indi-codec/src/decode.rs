//! XML to message
//!
//! Decoding works on one complete frame at a time (see [`crate::framer`]).
//! Unknown attributes and unknown child elements are ignored. Anything that
//! cannot be interpreted yields an error for this frame only.

use std::str::FromStr;

use indi_model::{
    Element, NumberFormat, NumberSpec, Permission, Property, PropertyKind, State, SwitchRule,
    Value,
};
use tracing::debug;
use xmltree::{Element as XmlElement, XMLNode};

use crate::blob;
use crate::error::{CodecError, Result};
use crate::message::{
    BlobPolicy, Definition, Deletion, EnableBlob, GetProperties, Message, NewValueRequest, Notice,
    OneValue, ValueUpdate,
};
use crate::timestamp::Timestamp;

/// Default cap on an inflated BLOB
pub const DEFAULT_MAX_BLOB_LEN: usize = 64 * 1024 * 1024;

/// Parses frames into messages
#[derive(Debug, Clone)]
pub struct Decoder {
    max_blob_len: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self {
            max_blob_len: DEFAULT_MAX_BLOB_LEN,
        }
    }
}

enum Verb {
    Def,
    Set,
    New,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upper bound for a decompressed BLOB payload
    pub fn with_max_blob_len(mut self, max_blob_len: usize) -> Self {
        self.max_blob_len = max_blob_len;
        self
    }

    /// Decode one complete top-level element
    pub fn decode(&self, frame: &[u8]) -> Result<Message> {
        let root = XmlElement::parse(frame)?;
        match root.name.as_str() {
            "getProperties" => Ok(Message::GetProperties(GetProperties {
                version: optional(&root, "version").map(str::to_string),
                device: optional(&root, "device").map(str::to_string),
                name: optional(&root, "name").map(str::to_string),
            })),
            "delProperty" => Ok(Message::Delete(Deletion {
                device: required(&root, "device")?.to_string(),
                name: optional(&root, "name").map(str::to_string),
                timestamp: timestamp(&root),
                message: optional(&root, "message").map(str::to_string),
            })),
            "message" => Ok(Message::Message(Notice {
                device: optional(&root, "device").map(str::to_string),
                timestamp: timestamp(&root),
                message: optional(&root, "message").unwrap_or_default().to_string(),
            })),
            "enableBLOB" => {
                let text = text_of(&root);
                let policy = BlobPolicy::from_str(&text).map_err(|_| CodecError::InvalidAttribute {
                    tag: root.name.clone(),
                    attribute: "policy",
                    value: text.clone(),
                })?;
                Ok(Message::EnableBlob(EnableBlob {
                    device: required(&root, "device")?.to_string(),
                    name: optional(&root, "name").map(str::to_string),
                    policy,
                }))
            }
            tag => match split_vector_tag(tag) {
                Some((Verb::Def, kind)) => self.decode_definition(&root, kind),
                Some((Verb::Set, kind)) => Ok(Message::Set(ValueUpdate {
                    device: required(&root, "device")?.to_string(),
                    name: required(&root, "name")?.to_string(),
                    kind,
                    state: parsed(&root, "state")?,
                    timeout: parsed(&root, "timeout")?,
                    timestamp: timestamp(&root),
                    message: optional(&root, "message").map(str::to_string),
                    values: self.decode_values(&root, kind)?,
                })),
                Some((Verb::New, kind)) => Ok(Message::New(NewValueRequest {
                    device: required(&root, "device")?.to_string(),
                    name: required(&root, "name")?.to_string(),
                    kind,
                    timestamp: timestamp(&root),
                    values: self.decode_values(&root, kind)?,
                })),
                None => Err(CodecError::UnknownMessage(tag.to_string())),
            },
        }
    }

    fn decode_definition(&self, root: &XmlElement, kind: PropertyKind) -> Result<Message> {
        let device = required(root, "device")?;
        let name = required(root, "name")?;

        let mut builder = Property::builder(device, name, kind)
            .label(optional(root, "label").unwrap_or(name))
            .group(optional(root, "group").unwrap_or_default())
            .state(parsed::<State>(root, "state")?.unwrap_or_default())
            .perm(parsed::<Permission>(root, "perm")?.unwrap_or_default())
            .timeout(parsed::<f64>(root, "timeout")?.unwrap_or(0.0));
        if kind == PropertyKind::Switch {
            if let Some(rule) = parsed::<SwitchRule>(root, "rule")? {
                builder = builder.rule(rule);
            }
        }

        let leaf = format!("def{}", kind.tag_name());
        for child in children(root, &leaf) {
            builder = builder.element(self.decode_definition_leaf(child, kind)?);
        }

        Ok(Message::Define(Definition {
            property: builder.build()?,
            timestamp: timestamp(root),
            message: optional(root, "message").map(str::to_string),
        }))
    }

    fn decode_definition_leaf(&self, child: &XmlElement, kind: PropertyKind) -> Result<Element> {
        let name = required(child, "name")?;
        let text = text_of(child);
        let element = match kind {
            PropertyKind::Text => Element::text(name, text),
            PropertyKind::Number => {
                let format = match optional(child, "format") {
                    Some(spec) => NumberFormat::parse(spec)?,
                    None => NumberFormat::default(),
                };
                let bound = |attribute: &'static str| -> Result<f64> {
                    optional(child, attribute)
                        .map(|v| {
                            indi_model::scan_sexagesimal(v).map_err(|_| invalid(child, attribute, v))
                        })
                        .unwrap_or(Ok(0.0))
                };
                let spec = NumberSpec::new(format, bound("min")?, bound("max")?, bound("step")?);
                let value = spec.format.parse_value(&text)?;
                Element::number(name, value, spec)
            }
            PropertyKind::Switch => Element::switch(name, text.parse()?),
            PropertyKind::Light => Element::light(name, text.parse()?),
            PropertyKind::Blob => Element::blob(name),
        };
        Ok(match optional(child, "label") {
            Some(label) => element.with_label(label),
            None => element,
        })
    }

    fn decode_values(&self, root: &XmlElement, kind: PropertyKind) -> Result<Vec<OneValue>> {
        let leaf = format!("one{}", kind.tag_name());
        children(root, &leaf)
            .map(|child| {
                let name = required(child, "name")?;
                let text = text_of(child);
                let value = match kind {
                    PropertyKind::Blob => Value::Blob(blob::decode(
                        name,
                        optional(child, "format").unwrap_or_default(),
                        parsed::<usize>(child, "size")?,
                        &text,
                        self.max_blob_len,
                    )?),
                    kind => Value::parse(kind, &text)?,
                };
                Ok(OneValue::new(name, value))
            })
            .collect()
    }
}

/// Decode with default limits
pub fn decode(frame: &[u8]) -> Result<Message> {
    Decoder::new().decode(frame)
}

fn split_vector_tag(tag: &str) -> Option<(Verb, PropertyKind)> {
    let stem = tag.strip_suffix("Vector")?;
    let (verb, kind) = if let Some(kind) = stem.strip_prefix("def") {
        (Verb::Def, kind)
    } else if let Some(kind) = stem.strip_prefix("set") {
        (Verb::Set, kind)
    } else if let Some(kind) = stem.strip_prefix("new") {
        (Verb::New, kind)
    } else {
        return None;
    };
    PropertyKind::from_tag_name(kind).map(|kind| (verb, kind))
}

fn children<'a>(root: &'a XmlElement, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
    root.children.iter().filter_map(move |node| match node {
        XMLNode::Element(child) if child.name == name => Some(child),
        _ => None,
    })
}

fn text_of(element: &XmlElement) -> String {
    element
        .get_text()
        .map(|t| t.into_owned())
        .unwrap_or_default()
}

fn optional<'a>(element: &'a XmlElement, attribute: &str) -> Option<&'a str> {
    element.attributes.get(attribute).map(String::as_str)
}

fn required<'a>(element: &'a XmlElement, attribute: &'static str) -> Result<&'a str> {
    optional(element, attribute).ok_or_else(|| CodecError::MissingAttribute {
        tag: element.name.clone(),
        attribute,
    })
}

fn parsed<T: FromStr>(element: &XmlElement, attribute: &'static str) -> Result<Option<T>> {
    optional(element, attribute)
        .map(|v| v.trim().parse::<T>().map_err(|_| invalid(element, attribute, v)))
        .transpose()
}

fn invalid(element: &XmlElement, attribute: &'static str, value: &str) -> CodecError {
    CodecError::InvalidAttribute {
        tag: element.name.clone(),
        attribute,
        value: value.to_string(),
    }
}

fn timestamp(element: &XmlElement) -> Option<Timestamp> {
    let raw = optional(element, "timestamp")?;
    match raw.parse() {
        Ok(ts) => Some(ts),
        Err(e) => {
            debug!("Ignoring unparseable timestamp '{}' on <{}>: {}", raw, element.name, e);
            None
        }
    }
}
