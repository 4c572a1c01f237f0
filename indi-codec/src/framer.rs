//! Incremental extraction of top-level elements from a byte stream
//!
//! The wire is a concatenation of XML elements with no envelope. The framer
//! tracks nesting depth with a small byte-level state machine so every
//! input byte is examined once, however the stream is chunked. Quoted
//! attribute values, comments, CDATA sections and processing instructions
//! are skipped over so that `<` or `>` inside them do not confuse depth
//! tracking.
//!
//! Between frames only whitespace, XML declarations and comments may
//! appear. Anything else is a framing error, as is a frame that grows past
//! the configured limit.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{CodecError, Result};

/// Default upper bound for one frame
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    /// Depth 0, outside any element
    Between,
    /// Just read `<`
    Open,
    /// Inside a start or end tag
    Tag {
        closing: bool,
        quote: Option<u8>,
        prev: u8,
    },
    /// Character data inside an element
    Content,
    /// `<?...?>`
    Instruction,
    /// Just read `<!`, not yet classified
    Bang,
    /// `<!--...-->`
    Comment,
    /// `<![CDATA[...]]>`
    CData,
    /// `<!DOCTYPE ...>` and similar
    Declaration,
}

/// Splits a byte stream into complete top-level elements
#[derive(Debug)]
pub struct Framer {
    buf: BytesMut,
    /// Next byte to examine
    pos: usize,
    /// Position of the `<` that opened the current markup construct
    mark: usize,
    /// Start of the frame being assembled
    start: Option<usize>,
    depth: usize,
    scan: Scan,
    max_frame_len: usize,
    /// Bytes consumed before `buf[0]`, for error offsets
    consumed: usize,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Framer {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            pos: 0,
            mark: 0,
            start: None,
            depth: 0,
            scan: Scan::Between,
            max_frame_len,
            consumed: 0,
        }
    }

    /// Append bytes read from the transport
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes held but not yet returned as frames
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Whether the framer sits between frames with nothing pending
    pub fn is_idle(&self) -> bool {
        self.scan == Scan::Between && self.buf.iter().all(u8::is_ascii_whitespace)
    }

    /// Return the next complete frame, or `None` if more input is needed
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        while self.pos < self.buf.len() {
            let pos = self.pos;
            let byte = self.buf[pos];
            self.pos += 1;

            match self.scan {
                Scan::Between => {
                    if byte == b'<' {
                        self.mark = pos;
                        self.scan = Scan::Open;
                    } else if !byte.is_ascii_whitespace() && !self.is_bom(pos) {
                        return Err(CodecError::Junk {
                            offset: self.consumed + pos,
                        });
                    }
                }
                Scan::Open => {
                    self.scan = match byte {
                        b'?' => Scan::Instruction,
                        b'!' => Scan::Bang,
                        b'/' => Scan::Tag {
                            closing: true,
                            quote: None,
                            prev: byte,
                        },
                        _ => {
                            if self.depth == 0 {
                                self.start = Some(self.mark);
                            }
                            Scan::Tag {
                                closing: false,
                                quote: None,
                                prev: byte,
                            }
                        }
                    };
                }
                Scan::Tag {
                    closing,
                    quote,
                    prev,
                } => match quote {
                    Some(q) if byte == q => {
                        self.scan = Scan::Tag {
                            closing,
                            quote: None,
                            prev: byte,
                        }
                    }
                    Some(_) => {}
                    None if byte == b'"' || byte == b'\'' => {
                        self.scan = Scan::Tag {
                            closing,
                            quote: Some(byte),
                            prev: byte,
                        }
                    }
                    None if byte == b'>' => {
                        if closing {
                            if self.depth == 0 {
                                return Err(CodecError::Unbalanced {
                                    offset: self.consumed + self.mark,
                                });
                            }
                            self.depth -= 1;
                        } else if prev != b'/' {
                            self.depth += 1;
                        }
                        if self.depth == 0 {
                            return Ok(Some(self.take_frame()));
                        }
                        self.scan = Scan::Content;
                    }
                    None => {
                        self.scan = Scan::Tag {
                            closing,
                            quote: None,
                            prev: byte,
                        }
                    }
                },
                Scan::Content => {
                    if byte == b'<' {
                        self.mark = pos;
                        self.scan = Scan::Open;
                    }
                }
                Scan::Instruction => {
                    if byte == b'>' && pos >= self.mark + 3 && self.buf[pos - 1] == b'?' {
                        self.end_construct();
                    }
                }
                Scan::Bang => {
                    // Classification needs up to 7 bytes past `<!`
                    let rest = &self.buf[self.mark + 2..];
                    if rest.starts_with(b"--") {
                        self.pos = self.mark + 4;
                        self.scan = Scan::Comment;
                    } else if rest.starts_with(b"[CDATA[") {
                        self.pos = self.mark + 9;
                        self.scan = Scan::CData;
                    } else if b"--".starts_with(&rest[..rest.len().min(2)])
                        || b"[CDATA[".starts_with(&rest[..rest.len().min(7)])
                    {
                        // Could still become a comment or CDATA
                        self.pos = pos;
                        return Ok(None);
                    } else {
                        self.scan = Scan::Declaration;
                        if byte == b'>' {
                            self.end_construct();
                        }
                    }
                }
                Scan::Comment => {
                    if byte == b'>' && pos >= self.mark + 6 && &self.buf[pos - 2..pos] == b"--" {
                        self.end_construct();
                    }
                }
                Scan::CData => {
                    if byte == b'>' && pos >= self.mark + 11 && &self.buf[pos - 2..pos] == b"]]" {
                        self.scan = Scan::Content;
                    }
                }
                Scan::Declaration => {
                    if byte == b'>' {
                        self.end_construct();
                    }
                }
            }

            if let Some(start) = self.start {
                if self.pos - start > self.max_frame_len {
                    return Err(CodecError::FrameTooLarge {
                        limit: self.max_frame_len,
                    });
                }
            }
        }

        if self.start.is_none() && self.scan == Scan::Between {
            self.discard(self.pos);
        }
        Ok(None)
    }

    /// Leave a comment, instruction or declaration
    fn end_construct(&mut self) {
        if self.depth == 0 {
            self.scan = Scan::Between;
            self.discard(self.pos);
        } else {
            self.scan = Scan::Content;
        }
    }

    fn take_frame(&mut self) -> Bytes {
        let start = self.start.take().unwrap_or(0);
        let mut frame = self.buf.split_to(self.pos);
        frame.advance(start);
        self.consumed += self.pos;
        self.pos = 0;
        self.mark = 0;
        self.scan = Scan::Between;
        frame.freeze()
    }

    fn discard(&mut self, upto: usize) {
        self.buf.advance(upto);
        self.consumed += upto;
        self.pos -= upto;
        self.mark = self.mark.saturating_sub(upto);
    }

    fn is_bom(&self, pos: usize) -> bool {
        self.consumed == 0 && pos < 3 && self.buf.starts_with(&[0xEF, 0xBB, 0xBF])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(framer: &mut Framer) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(frame) = framer.next_frame().unwrap() {
            out.push(String::from_utf8(frame.to_vec()).unwrap());
        }
        out
    }

    #[test]
    fn test_splits_concatenated_messages() {
        let mut framer = Framer::default();
        framer.extend(b"<a x=\"1\"/>\n<b><c>t</c></b>  <d/>");
        assert_eq!(frames(&mut framer), vec!["<a x=\"1\"/>", "<b><c>t</c></b>", "<d/>"]);
        assert!(framer.is_idle());
    }

    #[test]
    fn test_byte_at_a_time() {
        let input = b"<?xml version=\"1.0\"?>\n<setTextVector device=\"D\" name=\"N\"><oneText name=\"T\">a &gt; b</oneText></setTextVector>\n<message message=\"x\"/>";
        let mut framer = Framer::default();
        let mut out = Vec::new();
        for byte in input.iter() {
            framer.extend(&[*byte]);
            while let Some(frame) = framer.next_frame().unwrap() {
                out.push(frame);
            }
        }
        assert_eq!(out.len(), 2);
        assert!(out[0].starts_with(b"<setTextVector"));
        assert!(out[0].ends_with(b"</setTextVector>"));
        assert_eq!(&out[1][..], b"<message message=\"x\"/>");
    }

    #[test]
    fn test_markup_inside_quotes_and_cdata() {
        let mut framer = Framer::default();
        framer.extend(b"<a label=\"x > y / <z>\"><![CDATA[</a>]]><!-- </a> --></a><b/>");
        let out = frames(&mut framer);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], "<b/>");
    }

    #[test]
    fn test_comments_between_frames_are_skipped() {
        let mut framer = Framer::default();
        framer.extend(b"<!-- hello --><a/><!DOCTYPE x><b/>");
        assert_eq!(frames(&mut framer), vec!["<a/>", "<b/>"]);
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut framer = Framer::default();
        framer.extend(b"<a><b/>");
        assert!(framer.next_frame().unwrap().is_none());
        framer.extend(b"</a>");
        assert_eq!(frames(&mut framer), vec!["<a><b/></a>"]);
    }

    #[test]
    fn test_split_comment_opening() {
        let mut framer = Framer::default();
        framer.extend(b"<!");
        assert!(framer.next_frame().unwrap().is_none());
        framer.extend(b"-");
        assert!(framer.next_frame().unwrap().is_none());
        framer.extend(b"- <a/> --><b/>");
        assert_eq!(frames(&mut framer), vec!["<b/>"]);
    }

    #[test]
    fn test_junk_between_frames() {
        let mut framer = Framer::default();
        framer.extend(b"<a/>oops<b/>");
        assert_eq!(framer.next_frame().unwrap().unwrap(), Bytes::from_static(b"<a/>"));
        let err = framer.next_frame().unwrap_err();
        assert!(matches!(err, CodecError::Junk { offset: 4 }));
        assert!(err.is_framing());
    }

    #[test]
    fn test_unbalanced_close() {
        let mut framer = Framer::default();
        framer.extend(b"</a>");
        assert!(matches!(
            framer.next_frame().unwrap_err(),
            CodecError::Unbalanced { offset: 0 }
        ));
    }

    #[test]
    fn test_frame_limit() {
        let mut framer = Framer::new(16);
        framer.extend(b"<a>0123456789abcdef</a>");
        assert!(matches!(
            framer.next_frame().unwrap_err(),
            CodecError::FrameTooLarge { limit: 16 }
        ));
    }
}
