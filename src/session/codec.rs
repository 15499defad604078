//! # Message Codec
//!
//! JSON mapping between wire frames and session messages, in both directions:
//!
//! - **Ingress**: control messages `{ "language": "..", "type": "end" }`
//!   parsed directly from the UTF-8 byte slice of a text frame. Unknown
//!   fields are ignored, `type` is matched case-insensitively against `end`,
//!   and malformed JSON decodes to a no-op directive so a bad frame never
//!   disturbs the session.
//! - **Egress**: transcript and error messages serialized as single-line
//!   JSON through a scratch buffer that is reused across messages, so the
//!   hot path pays one serializer pass and one frame-sized copy per message.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Control message as it appears on the wire. Everything is optional;
/// serde's default behavior drops unknown fields, which is exactly the
/// tolerance the protocol requires.
#[derive(Debug, Deserialize)]
struct ControlMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    language: Option<String>,
}

/// Decoded effect of one control frame on the session.
///
/// The default value (no language change, no end request) doubles as the
/// "ignore" result for malformed input.
#[derive(Debug, Default, PartialEq)]
pub struct ControlDirective {
    /// New language selection, if the message carried one.
    pub language: Option<String>,

    /// True when the message asked to end the session (`"type": "end"`).
    pub end_requested: bool,
}

/// Parse one control frame. Malformed JSON yields the no-op directive.
pub fn decode_control(raw: &[u8]) -> ControlDirective {
    let message: ControlMessage = match serde_json::from_slice(raw) {
        Ok(message) => message,
        Err(err) => {
            tracing::debug!(error = %err, "ignoring malformed control message");
            return ControlDirective::default();
        }
    };

    let end_requested = message
        .kind
        .as_deref()
        .map(|kind| kind.eq_ignore_ascii_case("end"))
        .unwrap_or(false);

    ControlDirective {
        language: message.language,
        end_requested,
    }
}

/// Outbound messages sent to the client as single text frames.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum OutboundMessage<'a> {
    /// Final transcript for one audio payload.
    Transcript { text: &'a str },

    /// Generic error notification. Never carries internal detail.
    Error { message: &'a str },
}

/// Serializes outbound messages, reusing one scratch buffer across calls.
#[derive(Debug, Default)]
pub struct EgressEncoder {
    scratch: Vec<u8>,
}

impl EgressEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `{"type":"transcript","text":...}` as one frame payload.
    pub fn transcript(&mut self, text: &str) -> Bytes {
        self.encode(&OutboundMessage::Transcript { text })
    }

    /// Encode `{"type":"error","message":...}` as one frame payload.
    pub fn error(&mut self, message: &str) -> Bytes {
        self.encode(&OutboundMessage::Error { message })
    }

    fn encode(&mut self, message: &OutboundMessage<'_>) -> Bytes {
        self.scratch.clear();
        // Serialization of these shapes cannot fail: strings and a static tag.
        serde_json::to_writer(&mut self.scratch, message)
            .expect("outbound message serialization is infallible");
        Bytes::copy_from_slice(&self.scratch)
    }
}
