//! Line codec for the `0:`-prefixed delta wire format.
//!
//! The response body is a sequence of newline-terminated lines. Only lines
//! beginning with [`DELTA_PREFIX`] carry data; the remainder of such a line is
//! a JSON object with a `content` string.
//!
//! ```text
//! 0:{"content":"Hel"}
//! 0:{"content":"lo"}
//! ```
//!
//! Bytes stay in the read buffer until a full line has arrived, so a
//! multi-byte character split across two network chunks is decoded only once
//! both halves are present.

use bytes::{Buf, BytesMut};
use serde::Deserialize;
use tokio_util::codec::Decoder;

/// Prefix marking a text-delta line.
pub const DELTA_PREFIX: &str = "0:";

/// Payload of a delta line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeltaPayload {
    /// Text to append to the open assistant message.
    pub content: String,
}

/// One decoded, non-empty line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A well-formed delta line.
    Delta(String),
    /// A line without the delta prefix.
    Ignored,
    /// A delta line whose payload did not match [`DeltaPayload`].
    Malformed {
        /// Raw payload after the prefix.
        payload: String,
        /// Parser message.
        error: String,
    },
}

/// Longest line accepted by [`DeltaCodec::new`], terminator excluded.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Bytes of an oversized line kept in its [`Frame::Malformed`] payload.
const OVERSIZED_PREVIEW: usize = 64;

/// Splits a byte stream into lines and classifies each one.
///
/// A line longer than its maximum length yields one [`Frame::Malformed`];
/// its remaining bytes are dropped up to the next newline.
#[derive(Debug)]
pub struct DeltaCodec {
    /// Bytes of the buffer already scanned without finding a newline.
    scanned: usize,
    max_length: usize,
    /// Dropping the tail of an oversized line.
    discarding: bool,
}

impl Default for DeltaCodec {
    fn default() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl DeltaCodec {
    /// Create a new codec with [`DEFAULT_MAX_LINE_LENGTH`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec rejecting lines longer than `max_length` bytes.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            scanned: 0,
            max_length,
            discarding: false,
        }
    }

    /// Maximum accepted line length.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

fn oversized(line: &[u8], max_length: usize) -> Frame {
    let preview = &line[..line.len().min(OVERSIZED_PREVIEW)];
    Frame::Malformed {
        payload: String::from_utf8_lossy(preview).into_owned(),
        error: format!("line exceeds {max_length} bytes"),
    }
}

/// Classify a single line (without its terminator).
#[must_use]
pub fn classify_line(line: &str) -> Frame {
    let Some(payload) = line.strip_prefix(DELTA_PREFIX) else {
        return Frame::Ignored;
    };
    match serde_json::from_str::<DeltaPayload>(payload) {
        Ok(parsed) => Frame::Delta(parsed.content),
        Err(e) => Frame::Malformed {
            payload: payload.to_string(),
            error: e.to_string(),
        },
    }
}

fn decode_line(raw: &[u8]) -> Option<Frame> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    if raw.is_empty() {
        return None;
    }
    let line = String::from_utf8_lossy(raw);
    Some(classify_line(&line))
}

impl Decoder for DeltaCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        loop {
            let found = src[self.scanned..].iter().position(|b| *b == b'\n');

            if self.discarding {
                match found {
                    Some(offset) => {
                        src.advance(self.scanned + offset + 1);
                        self.scanned = 0;
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        src.clear();
                        self.scanned = 0;
                        return Ok(None);
                    }
                }
            }

            let Some(offset) = found else {
                if src.len() > self.max_length {
                    let frame = oversized(&src[..], self.max_length);
                    src.clear();
                    self.scanned = 0;
                    self.discarding = true;
                    return Ok(Some(frame));
                }
                self.scanned = src.len();
                return Ok(None);
            };
            let newline = self.scanned + offset;
            self.scanned = 0;

            let line = src.split_to(newline + 1);
            let line = &line[..newline];
            if line.len() > self.max_length {
                return Ok(Some(oversized(line, self.max_length)));
            }
            if let Some(frame) = decode_line(line) {
                return Ok(Some(frame));
            }
            // Empty line: keep scanning.
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        self.scanned = 0;
        self.discarding = false;
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        Ok(decode_line(&rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut DeltaCodec, buf: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_classify_delta_line() {
        assert_eq!(
            classify_line(r#"0:{"content":"Hi"}"#),
            Frame::Delta("Hi".to_string())
        );
    }

    #[test]
    fn test_classify_other_prefixes_ignored() {
        assert_eq!(classify_line("garbage"), Frame::Ignored);
        assert_eq!(classify_line(r#"2:[{"content":"x"}]"#), Frame::Ignored);
        assert_eq!(classify_line(r#" 0:{"content":"x"}"#), Frame::Ignored);
    }

    #[test]
    fn test_classify_schema_mismatch_is_malformed() {
        assert!(matches!(classify_line("0:not-json"), Frame::Malformed { .. }));
        assert!(matches!(classify_line(r#"0:{"text":"x"}"#), Frame::Malformed { .. }));
        assert!(matches!(classify_line(r#"0:{"content":7}"#), Frame::Malformed { .. }));
        assert!(matches!(classify_line(r#"0:"bare string""#), Frame::Malformed { .. }));
    }

    #[test]
    fn test_extra_fields_are_accepted() {
        assert_eq!(
            classify_line(r#"0:{"content":"ok","id":"abc"}"#),
            Frame::Delta("ok".to_string())
        );
    }

    #[test]
    fn test_partial_line_waits_for_newline() {
        let mut codec = DeltaCodec::new();
        let mut buf = BytesMut::from(&br#"0:{"content":"He"#[..]);
        assert!(decode_all(&mut codec, &mut buf).is_empty());

        buf.extend_from_slice(b"llo\"}\n");
        assert_eq!(
            decode_all(&mut codec, &mut buf),
            vec![Frame::Delta("Hello".to_string())]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let line = "0:{\"content\":\"caf\u{e9} \u{1f600}\"}\n".as_bytes();
        // Split inside the four-byte emoji.
        let cut = line.len() - 5;

        let mut codec = DeltaCodec::new();
        let mut buf = BytesMut::from(&line[..cut]);
        assert!(decode_all(&mut codec, &mut buf).is_empty());
        buf.extend_from_slice(&line[cut..]);

        assert_eq!(
            decode_all(&mut codec, &mut buf),
            vec![Frame::Delta("caf\u{e9} \u{1f600}".to_string())]
        );
    }

    #[test]
    fn test_empty_and_crlf_lines() {
        let mut codec = DeltaCodec::new();
        let mut buf = BytesMut::from(&b"\n\r\n0:{\"content\":\"a\"}\r\n\n"[..]);
        assert_eq!(
            decode_all(&mut codec, &mut buf),
            vec![Frame::Delta("a".to_string())]
        );
    }

    #[test]
    fn test_eof_flushes_unterminated_line() {
        let mut codec = DeltaCodec::new();
        let mut buf = BytesMut::from(&br#"0:{"content":"tail"}"#[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(Frame::Delta("tail".to_string()))
        );
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_oversized_line_is_malformed_and_skipped() {
        let mut codec = DeltaCodec::with_max_length(20);
        let mut buf = BytesMut::from(&b"0:{\"content\":\"far too long\"}\n0:{\"content\":\"a\"}\n"[..]);

        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Frame::Malformed { error, .. } if error.contains("20")));
        assert_eq!(frames[1], Frame::Delta("a".to_string()));
    }

    #[test]
    fn test_unterminated_oversized_line_does_not_grow_buffer() {
        let mut codec = DeltaCodec::with_max_length(24);
        let mut buf = BytesMut::from(&b"0:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"[..]);

        assert!(matches!(codec.decode(&mut buf).unwrap(), Some(Frame::Malformed { .. })));
        assert!(buf.is_empty());

        // The rest of the oversized line is dropped as it arrives.
        buf.extend_from_slice(b"bbbbbbbbbbbbbbbbbbbb");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        buf.extend_from_slice(b"cc\n0:{\"content\":\"ok\"}\n");
        assert_eq!(
            decode_all(&mut codec, &mut buf),
            vec![Frame::Delta("ok".to_string())]
        );
    }
}
