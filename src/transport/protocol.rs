//! Operation framing codec.
//!
//! Every text message on the control channel is a frame:
//! `<operation><separator><payload>`. The operation tag never contains the
//! separator; the payload may. Decoding therefore splits on the first
//! separator occurrence only.
//!
//! Binary bodies never pass through this codec. They travel as a separate
//! binary message right after their CONTENT metadata frame.

use std::fmt;

use thiserror::Error;

/// Canonical frame separator.
pub const DEFAULT_SEPARATOR: char = '\0';

/// Separator between header lines in a CONTENT frame.
pub const HEADER_LINE_SEPARATOR: &str = "\r\n";

/// Operation vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Agent → controller handshake carrying the agent context.
    Init,
    /// Informational message; `debug` and `message` are both accepted.
    Debug,
    /// Controller → agent fetch command; payload is the target URL.
    Scrape,
    /// Agent → controller fetch metadata; followed by a binary body message.
    Content,
    /// Any tag outside the vocabulary.
    Unknown(String),
}

impl Op {
    /// Every tag the vocabulary recognizes, aliases included.
    pub const TAGS: [&'static str; 5] = ["init", "debug", "message", "scrape", "content"];

    /// Parse an operation tag (case-sensitive).
    pub fn parse(tag: &str) -> Self {
        match tag {
            "init" => Self::Init,
            "debug" | "message" => Self::Debug,
            "scrape" => Self::Scrape,
            "content" => Self::Content,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Wire tag for this operation.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Init => "init",
            Self::Debug => "debug",
            Self::Scrape => "scrape",
            Self::Content => "content",
            Self::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Framing errors. These are programming errors, never runtime input errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("separator {separator:?} occurs in operation tag {tag:?}")]
    SeparatorInVocabulary { separator: char, tag: &'static str },

    #[error("operation {op:?} contains separator {separator:?}")]
    SeparatorInOperation { op: String, separator: char },
}

/// A decoded frame borrowing from the received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Raw operation tag.
    pub op: &'a str,
    /// Everything after the first separator, embedded separators included.
    pub payload: &'a str,
}

impl Frame<'_> {
    /// Interpret the tag against the operation vocabulary.
    pub fn operation(&self) -> Op {
        Op::parse(self.op)
    }
}

/// Encoder/decoder bound to one separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    separator: char,
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR,
        }
    }
}

impl Codec {
    /// Create a codec, rejecting separators that would collide with a
    /// vocabulary tag.
    pub fn new(separator: char) -> Result<Self, CodecError> {
        if let Some(&tag) = Op::TAGS.iter().find(|tag| tag.contains(separator)) {
            return Err(CodecError::SeparatorInVocabulary { separator, tag });
        }
        Ok(Self { separator })
    }

    /// The configured separator.
    pub const fn separator(&self) -> char {
        self.separator
    }

    /// Encode a vocabulary operation.
    ///
    /// `Unknown` tags are not checked here; use [`Codec::encode_raw`] for
    /// tags coming from outside the vocabulary.
    pub fn encode(&self, op: &Op, payload: &str) -> String {
        let tag = op.as_str();
        let mut out = String::with_capacity(tag.len() + self.separator.len_utf8() + payload.len());
        out.push_str(tag);
        out.push(self.separator);
        out.push_str(payload);
        out
    }

    /// Encode an arbitrary operation tag.
    pub fn encode_raw(&self, op: &str, payload: &str) -> Result<String, CodecError> {
        if op.contains(self.separator) {
            return Err(CodecError::SeparatorInOperation {
                op: op.to_string(),
                separator: self.separator,
            });
        }
        Ok(self.encode(&Op::Unknown(op.to_string()), payload))
    }

    /// Decode a message. Never fails: a message without a separator is all
    /// operation and no payload.
    pub fn decode<'a>(&self, message: &'a str) -> Frame<'a> {
        match message.split_once(self.separator) {
            Some((op, payload)) => Frame { op, payload },
            None => Frame {
                op: message,
                payload: "",
            },
        }
    }

    /// Build the CONTENT metadata frame: `content <sep> status <sep> headers`.
    pub fn content_metadata(&self, status: u16, headers: &[(String, String)]) -> String {
        let payload = format!("{status}{}{}", self.separator, serialize_headers(headers));
        self.encode(&Op::Content, &payload)
    }
}

/// Serialize response headers as `name: value` lines joined by CRLF, in the
/// order they were received.
pub fn serialize_headers(headers: &[(String, String)]) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect::<Vec<_>>()
        .join(HEADER_LINE_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_embedded_separators() {
        let codec = Codec::default();
        for payload in ["", "plain", "a\0b", "\0\0", "https://x\0y\0z"] {
            let wire = codec.encode(&Op::Scrape, payload);
            let frame = codec.decode(&wire);
            assert_eq!(frame.op, "scrape");
            assert_eq!(frame.payload, payload);
        }
    }

    #[test]
    fn decode_splits_on_first_separator() {
        let codec = Codec::default();
        let frame = codec.decode("scrape\0https://x\0y");
        assert_eq!(frame.operation(), Op::Scrape);
        assert_eq!(frame.payload, "https://x\0y");
    }

    #[test]
    fn decode_without_separator_is_all_operation() {
        let codec = Codec::default();
        let frame = codec.decode("garbage");
        assert_eq!(frame.op, "garbage");
        assert_eq!(frame.payload, "");
        assert_eq!(frame.operation(), Op::Unknown("garbage".into()));
    }

    #[test]
    fn decode_empty_message() {
        let frame = Codec::default().decode("");
        assert_eq!(frame, Frame { op: "", payload: "" });
    }

    #[test]
    fn colon_separator_variant() {
        let codec = Codec::new(':').unwrap();
        let frame = codec.decode("scrape:https://example.test:8443/a");
        assert_eq!(frame.operation(), Op::Scrape);
        assert_eq!(frame.payload, "https://example.test:8443/a");
        assert_eq!(codec.encode(&Op::Init, "https://xana.sh/"), "init:https://xana.sh/");
    }

    #[test]
    fn message_is_debug_alias() {
        assert_eq!(Op::parse("message"), Op::Debug);
        assert_eq!(Op::parse("debug"), Op::Debug);
        assert_eq!(Op::parse("SCRAPE"), Op::Unknown("SCRAPE".into()));
    }

    #[test]
    fn separator_colliding_with_vocabulary_is_rejected() {
        let err = Codec::new('e').unwrap_err();
        assert!(matches!(
            err,
            CodecError::SeparatorInVocabulary { separator: 'e', .. }
        ));
    }

    #[test]
    fn encode_raw_rejects_separator_in_operation() {
        let codec = Codec::default();
        assert!(codec.encode_raw("bad\0op", "x").is_err());
        assert_eq!(codec.encode_raw("ping", "x").unwrap(), "ping\0x");
    }

    #[test]
    fn content_metadata_layout() {
        let codec = Codec::default();
        let headers = vec![
            ("content-type".to_string(), "application/octet-stream".to_string()),
            ("set-cookie".to_string(), "a=1".to_string()),
            ("set-cookie".to_string(), "b=2".to_string()),
        ];
        let wire = codec.content_metadata(404, &headers);
        assert_eq!(
            wire,
            "content\0404\0content-type: application/octet-stream\r\nset-cookie: a=1\r\nset-cookie: b=2"
        );

        let frame = codec.decode(&wire);
        assert_eq!(frame.operation(), Op::Content);
        let (status, headers) = frame.payload.split_once('\0').unwrap();
        assert_eq!(status, "404");
        assert_eq!(headers.lines().count(), 3);
    }

    #[test]
    fn serialize_no_headers() {
        assert_eq!(serialize_headers(&[]), "");
    }
}
