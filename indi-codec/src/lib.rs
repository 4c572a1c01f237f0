//! INDI Wire Codec
//!
//! Converts between [`Message`]s and the XML wire dialect spoken by INDI
//! drivers, servers and clients.
//!
//! - [`Encoder`] writes one message as one top-level element, escaping text,
//!   formatting numbers with their element's format and base64-streaming
//!   BLOB payloads (optionally zlib-compressed, marked by a `.z` format
//!   suffix)
//! - [`Framer`] cuts an unbounded byte stream into complete top-level
//!   elements, in linear time regardless of how the input is chunked
//! - [`Decoder`] turns one frame into a message; it ignores unknown
//!   attributes and fails for that frame only on anything it cannot
//!   interpret
//!
//! ```rust
//! use indi_codec::{decode, encode, Framer, GetProperties, Message};
//!
//! let bytes = encode(&Message::GetProperties(GetProperties::all())).unwrap();
//!
//! let mut framer = Framer::default();
//! framer.extend(&bytes);
//! let frame = framer.next_frame().unwrap().unwrap();
//! assert_eq!(decode(&frame).unwrap(), Message::GetProperties(GetProperties::all()));
//! ```

pub mod blob;
pub mod decode;
pub mod encode;
pub mod error;
pub mod framer;
pub mod message;
pub mod timestamp;

pub use decode::{decode, Decoder};
pub use encode::{definition_of, encode, Encoder};
pub use error::{CodecError, Result};
pub use framer::Framer;
pub use message::{
    values_of, BlobPolicy, Definition, Deletion, EnableBlob, GetProperties, Message,
    NewValueRequest, Notice, OneValue, ValueUpdate, PROTOCOL_VERSION,
};
pub use timestamp::Timestamp;
