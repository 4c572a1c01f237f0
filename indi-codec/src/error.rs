//! Error types for encoding, decoding and framing

use indi_model::ModelError;
use thiserror::Error;

/// Errors raised by the wire codec
///
/// Decode errors are scoped to one message: the caller drops that message
/// and keeps the session. Framing errors mean the byte stream itself can no
/// longer be trusted and the session has to go.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The frame is not well-formed XML
    #[error("Malformed XML: {0}")]
    Xml(String),

    /// The root tag is not an INDI message
    #[error("Unknown message tag '{0}'")]
    UnknownMessage(String),

    /// A required attribute is absent
    #[error("<{tag}> is missing required attribute '{attribute}'")]
    MissingAttribute {
        tag: String,
        attribute: &'static str,
    },

    /// An attribute value could not be interpreted
    #[error("<{tag}> has invalid {attribute} '{value}'")]
    InvalidAttribute {
        tag: String,
        attribute: &'static str,
        value: String,
    },

    /// BLOB content could not be decoded to the declared size
    #[error("BLOB '{element}': {reason}")]
    Blob { element: String, reason: String },

    /// Element or property level validation failed
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Writing the encoded message failed
    #[error("Encoding failed: {0}")]
    Encode(String),

    /// Non-whitespace bytes between top-level messages
    #[error("Unexpected data between messages at byte {offset}")]
    Junk { offset: usize },

    /// A closing tag without a matching opening tag
    #[error("Unbalanced closing tag at byte {offset}")]
    Unbalanced { offset: usize },

    /// A single message exceeded the configured frame limit
    #[error("Message exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
}

impl CodecError {
    /// Whether the error invalidates the whole byte stream
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            CodecError::Junk { .. } | CodecError::Unbalanced { .. } | CodecError::FrameTooLarge { .. }
        )
    }
}

impl From<quick_xml::Error> for CodecError {
    fn from(e: quick_xml::Error) -> Self {
        CodecError::Encode(e.to_string())
    }
}

impl From<std::io::Error> for CodecError {
    fn from(e: std::io::Error) -> Self {
        CodecError::Encode(e.to_string())
    }
}

impl From<xmltree::ParseError> for CodecError {
    fn from(e: xmltree::ParseError) -> Self {
        CodecError::Xml(e.to_string())
    }
}

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_classification() {
        assert!(CodecError::Junk { offset: 3 }.is_framing());
        assert!(CodecError::FrameTooLarge { limit: 10 }.is_framing());
        assert!(!CodecError::UnknownMessage("foo".into()).is_framing());
        assert!(!CodecError::Xml("eof".into()).is_framing());
    }

    #[test]
    fn test_error_display() {
        let err = CodecError::MissingAttribute {
            tag: "setNumberVector".into(),
            attribute: "device",
        };
        assert_eq!(
            err.to_string(),
            "<setNumberVector> is missing required attribute 'device'"
        );
    }
}
