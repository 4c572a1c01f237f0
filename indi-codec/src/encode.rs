//! Message to XML
//!
//! Every message becomes exactly one top-level element followed by a
//! newline. Text and attribute values are escaped by the writer. Numbers use
//! their element's declared format when one is known, otherwise the shortest
//! representation that parses back to the same value. BLOB payloads are
//! base64-streamed straight into the output.

use std::io::Write;

use bytes::Bytes;
use indi_model::{Element, ElementData, Property, PropertyKind, Value};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::blob;
use crate::error::Result;
use crate::message::{Definition, Message, OneValue};

/// Serializes messages to their wire form
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    compress_blobs: bool,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compress every outgoing BLOB, not only those that ask for it
    pub fn with_compression(mut self, compress_blobs: bool) -> Self {
        self.compress_blobs = compress_blobs;
        self
    }

    /// Encode one message into a standalone frame
    pub fn encode(&self, message: &Message) -> Result<Bytes> {
        let mut out = Vec::with_capacity(256);
        self.write(message, &mut out)?;
        Ok(Bytes::from(out))
    }

    /// Encode one message into any writer
    pub fn write<W: Write>(&self, message: &Message, out: W) -> Result<()> {
        let mut writer = Writer::new(out);
        match message {
            Message::GetProperties(m) => {
                let mut tag = BytesStart::new("getProperties");
                push_opt(&mut tag, "version", m.version.as_deref());
                push_opt(&mut tag, "device", m.device.as_deref());
                push_opt(&mut tag, "name", m.name.as_deref());
                writer.write_event(Event::Empty(tag))?;
            }
            Message::Define(definition) => self.write_definition(&mut writer, definition)?,
            Message::Set(update) => {
                let name = format!("set{}Vector", update.kind.tag_name());
                let mut tag = BytesStart::new(name.as_str());
                tag.push_attribute(("device", update.device.as_str()));
                tag.push_attribute(("name", update.name.as_str()));
                if let Some(state) = update.state {
                    tag.push_attribute(("state", state.as_str()));
                }
                if let Some(timeout) = update.timeout {
                    tag.push_attribute(("timeout", timeout.to_string().as_str()));
                }
                push_timestamp(&mut tag, update.timestamp.as_ref());
                push_opt(&mut tag, "message", update.message.as_deref());
                self.write_vector(&mut writer, tag, &name, update.kind, &update.values)?;
            }
            Message::New(request) => {
                let name = format!("new{}Vector", request.kind.tag_name());
                let mut tag = BytesStart::new(name.as_str());
                tag.push_attribute(("device", request.device.as_str()));
                tag.push_attribute(("name", request.name.as_str()));
                push_timestamp(&mut tag, request.timestamp.as_ref());
                self.write_vector(&mut writer, tag, &name, request.kind, &request.values)?;
            }
            Message::Delete(deletion) => {
                let mut tag = BytesStart::new("delProperty");
                tag.push_attribute(("device", deletion.device.as_str()));
                push_opt(&mut tag, "name", deletion.name.as_deref());
                push_timestamp(&mut tag, deletion.timestamp.as_ref());
                push_opt(&mut tag, "message", deletion.message.as_deref());
                writer.write_event(Event::Empty(tag))?;
            }
            Message::Message(notice) => {
                let mut tag = BytesStart::new("message");
                push_opt(&mut tag, "device", notice.device.as_deref());
                push_timestamp(&mut tag, notice.timestamp.as_ref());
                tag.push_attribute(("message", notice.message.as_str()));
                writer.write_event(Event::Empty(tag))?;
            }
            Message::EnableBlob(enable) => {
                let mut tag = BytesStart::new("enableBLOB");
                tag.push_attribute(("device", enable.device.as_str()));
                push_opt(&mut tag, "name", enable.name.as_deref());
                write_leaf(&mut writer, tag, "enableBLOB", enable.policy.as_str())?;
            }
        }
        writer.get_mut().write_all(b"\n")?;
        Ok(())
    }

    fn write_definition<W: Write>(&self, writer: &mut Writer<W>, definition: &Definition) -> Result<()> {
        let property = &definition.property;
        let kind = property.kind();
        let name = format!("def{}Vector", kind.tag_name());

        let mut tag = BytesStart::new(name.as_str());
        tag.push_attribute(("device", property.device()));
        tag.push_attribute(("name", property.name()));
        tag.push_attribute(("label", property.label()));
        tag.push_attribute(("group", property.group()));
        tag.push_attribute(("state", property.state().as_str()));
        if kind != PropertyKind::Light {
            tag.push_attribute(("perm", property.perm().as_str()));
            tag.push_attribute(("timeout", property.timeout().to_string().as_str()));
        }
        if let Some(rule) = property.rule() {
            tag.push_attribute(("rule", rule.as_str()));
        }
        push_timestamp(&mut tag, definition.timestamp.as_ref());
        push_opt(&mut tag, "message", definition.message.as_deref());

        writer.write_event(Event::Start(tag))?;
        let leaf = format!("def{}", kind.tag_name());
        for element in property.elements() {
            write_definition_leaf(writer, &leaf, element)?;
        }
        writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
        Ok(())
    }

    fn write_vector<W: Write>(
        &self,
        writer: &mut Writer<W>,
        tag: BytesStart<'_>,
        name: &str,
        kind: PropertyKind,
        values: &[OneValue],
    ) -> Result<()> {
        writer.write_event(Event::Start(tag))?;
        let leaf = format!("one{}", kind.tag_name());
        for one in values {
            let mut tag = BytesStart::new(leaf.as_str());
            tag.push_attribute(("name", one.name.as_str()));
            match &one.value {
                Value::Blob(b) => {
                    let payload = blob::prepare(b, self.compress_blobs);
                    tag.push_attribute(("size", payload.size.to_string().as_str()));
                    tag.push_attribute(("format", payload.format.as_str()));
                    if payload.bytes.is_empty() {
                        writer.write_event(Event::Empty(tag))?;
                    } else {
                        writer.write_event(Event::Start(tag))?;
                        blob::write_base64(writer.get_mut(), &payload.bytes)?;
                        writer.write_event(Event::End(BytesEnd::new(leaf.as_str())))?;
                    }
                }
                value => {
                    let text = value_text(value, one);
                    write_leaf(writer, tag, &leaf, &text)?;
                }
            }
        }
        writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }
}

/// Encode with default options
pub fn encode(message: &Message) -> Result<Bytes> {
    Encoder::new().encode(message)
}

fn value_text(value: &Value, one: &OneValue) -> String {
    match value {
        Value::Text(s) => s.clone(),
        Value::Number(n) => match &one.format {
            Some(format) => format.format(*n),
            None => n.to_string(),
        },
        Value::Switch(s) => s.as_str().to_string(),
        Value::Light(s) => s.as_str().to_string(),
        Value::Blob(_) => String::new(),
    }
}

fn write_definition_leaf<W: Write>(writer: &mut Writer<W>, leaf: &str, element: &Element) -> Result<()> {
    let mut tag = BytesStart::new(leaf);
    tag.push_attribute(("name", element.name()));
    tag.push_attribute(("label", element.label()));
    if let ElementData::Number { spec, .. } = element.data() {
        tag.push_attribute(("format", spec.format.as_str()));
        tag.push_attribute(("min", spec.min.to_string().as_str()));
        tag.push_attribute(("max", spec.max.to_string().as_str()));
        tag.push_attribute(("step", spec.step.to_string().as_str()));
    }
    write_leaf(writer, tag, leaf, &element.text_value())
}

fn write_leaf<W: Write>(writer: &mut Writer<W>, tag: BytesStart<'_>, name: &str, text: &str) -> Result<()> {
    if text.is_empty() {
        writer.write_event(Event::Empty(tag))?;
    } else {
        writer.write_event(Event::Start(tag))?;
        writer.write_event(Event::Text(BytesText::new(text)))?;
        writer.write_event(Event::End(BytesEnd::new(name)))?;
    }
    Ok(())
}

fn push_opt(tag: &mut BytesStart<'_>, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        tag.push_attribute((name, value));
    }
}

fn push_timestamp(tag: &mut BytesStart<'_>, timestamp: Option<&crate::timestamp::Timestamp>) {
    if let Some(ts) = timestamp {
        tag.push_attribute(("timestamp", ts.to_string().as_str()));
    }
}

/// Definition message for a property as it stands
pub fn definition_of(property: &Property) -> Message {
    Message::Define(Definition::new(property.clone()))
}
