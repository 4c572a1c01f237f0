//! BLOB transport encoding
//!
//! Payloads travel as base64 text. A payload may first be zlib-compressed,
//! in which case `.z` is appended to its format tag; the `size` attribute
//! always announces the uncompressed length.

use std::borrow::Cow;
use std::io::Write;

use base64::engine::general_purpose::STANDARD;
use base64::write::EncoderWriter;
use base64::Engine;
use bytes::Bytes;
use indi_model::Blob;
use miniz_oxide::deflate::compress_to_vec_zlib;
use miniz_oxide::inflate::decompress_to_vec_zlib_with_limit;

use crate::error::{CodecError, Result};

/// Format suffix marking a zlib-compressed payload
pub const COMPRESSED_SUFFIX: &str = ".z";

const COMPRESSION_LEVEL: u8 = 6;

/// A BLOB prepared for the wire
#[derive(Debug)]
pub struct WirePayload<'a> {
    pub format: String,
    /// Uncompressed length
    pub size: usize,
    pub bytes: Cow<'a, [u8]>,
}

/// Prepare a payload, compressing it when asked to by the BLOB itself or by
/// the caller
pub fn prepare(blob: &Blob, compress: bool) -> WirePayload<'_> {
    let already = blob.format.ends_with(COMPRESSED_SUFFIX);
    if (compress || blob.compress) && !already && !blob.is_empty() {
        WirePayload {
            format: format!("{}{}", blob.format, COMPRESSED_SUFFIX),
            size: blob.len(),
            bytes: Cow::Owned(compress_to_vec_zlib(&blob.data, COMPRESSION_LEVEL)),
        }
    } else {
        WirePayload {
            format: blob.format.clone(),
            size: blob.len(),
            bytes: Cow::Borrowed(&blob.data[..]),
        }
    }
}

/// Stream base64 of `bytes` into `out` without an intermediate string
pub fn write_base64<W: Write>(out: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    let mut encoder = EncoderWriter::new(out, &STANDARD);
    encoder.write_all(bytes)?;
    encoder.finish()?;
    Ok(())
}

/// Recover the raw payload from its wire form
///
/// Whitespace inside the base64 text is ignored. A `size` of zero or none
/// skips the length check; `limit` caps the inflated size.
pub fn decode(
    element: &str,
    format: &str,
    size: Option<usize>,
    text: &str,
    limit: usize,
) -> Result<Blob> {
    let fail = |reason: String| CodecError::Blob {
        element: element.to_string(),
        reason,
    };

    let compact: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let raw = STANDARD
        .decode(&compact)
        .map_err(|e| fail(format!("invalid base64: {e}")))?;

    let (format, data) = match format.strip_suffix(COMPRESSED_SUFFIX) {
        Some(stripped) => {
            let inflated = decompress_to_vec_zlib_with_limit(&raw, limit)
                .map_err(|e| fail(format!("inflate failed: {:?}", e.status)))?;
            (stripped.to_string(), inflated)
        }
        None => (format.to_string(), raw),
    };

    if let Some(size) = size.filter(|s| *s > 0) {
        if size != data.len() {
            return Err(fail(format!(
                "declared size {size} but decoded {} bytes",
                data.len()
            )));
        }
    }

    Ok(Blob::new(format, Bytes::from(data)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_text(payload: &WirePayload<'_>) -> String {
        let mut out = Vec::new();
        write_base64(&mut out, &payload.bytes).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_plain_round_trip() {
        let blob = Blob::new(".fits", b"SIMPLE  =                    T".to_vec());
        let payload = prepare(&blob, false);
        assert_eq!(payload.format, ".fits");
        let text = wire_text(&payload);
        let decoded = decode("CCD1", &payload.format, Some(payload.size), &text, 1 << 20).unwrap();
        assert_eq!(decoded, blob);
    }

    #[test]
    fn test_compressed_round_trip() {
        let blob = Blob::new(".raw", vec![7u8; 4096]).compressed();
        let payload = prepare(&blob, false);
        assert_eq!(payload.format, ".raw.z");
        assert_eq!(payload.size, 4096);
        assert!(payload.bytes.len() < 4096);

        let text = wire_text(&payload);
        let decoded = decode("CCD1", &payload.format, Some(payload.size), &text, 1 << 20).unwrap();
        assert_eq!(decoded.format, ".raw");
        assert_eq!(decoded.data.len(), 4096);
        assert_eq!(decoded, blob);
    }

    #[test]
    fn test_whitespace_in_base64_is_ignored() {
        let decoded = decode("B", ".txt", Some(5), "aGVs\n  bG8=\n", 1024).unwrap();
        assert_eq!(&decoded.data[..], b"hello");
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let err = decode("B", ".txt", Some(9), "aGVsbG8=", 1024).unwrap_err();
        assert!(matches!(err, CodecError::Blob { .. }));
    }

    #[test]
    fn test_inflate_limit() {
        let blob = Blob::new(".raw", vec![0u8; 10_000]);
        let payload = prepare(&blob, true);
        let text = wire_text(&payload);
        assert!(decode("B", &payload.format, None, &text, 1_000).is_err());
    }

    #[test]
    fn test_empty_blob_is_not_compressed() {
        let blob = Blob::new(".fits", Vec::<u8>::new());
        let payload = prepare(&blob, true);
        assert_eq!(payload.format, ".fits");
        assert_eq!(wire_text(&payload), "");
    }
}
