//! Inbound frame decoding.
//!
//! Frames arrive as `{"event": <kind>, "data": <value>}`. The socket sometimes
//! delivers `data` as a JSON document encoded in a string; that string is
//! decoded a second time. A failed second pass keeps the raw string and the
//! outer event is still forwarded.

use crate::error::DecodeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event kind the socket sends once the identity payload is accepted.
pub const ACK_EVENT_KIND: &str = "EVENT_CONNECTED";

/// Raw envelope as received on the wire.
#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// A decoded application event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedEvent {
    /// Event kind (`event` field of the envelope).
    pub kind: String,
    /// Structured payload (`data` field, nested JSON already unwrapped).
    pub payload: Value,
    /// Receive timestamp.
    pub received_at: DateTime<Utc>,
}

impl DecodedEvent {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            received_at: Utc::now(),
        }
    }

    /// Check if this is the handshake acknowledgement.
    pub fn is_acknowledgement(&self) -> bool {
        self.kind == ACK_EVENT_KIND
    }

    /// Human-readable `data.message`, if present.
    pub fn message(&self) -> Option<&str> {
        self.payload.get("message").and_then(Value::as_str)
    }
}

/// Outcome of the nested payload pass.
#[derive(Debug, Clone, PartialEq)]
pub enum NestedPayload {
    /// `data` was not a string.
    NotNested,
    /// `data` was a string and decoded into structured data.
    Decoded,
    /// `data` was a string that is not valid JSON; kept as-is.
    Raw { error: String },
}

/// Decoded event plus what happened to its payload.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub event: DecodedEvent,
    pub nested: NestedPayload,
}

/// Decode one text frame.
///
/// Errors only when the outer envelope is malformed. Nested payload failures
/// are reported through [`NestedPayload::Raw`].
pub fn decode_frame(text: &str) -> Result<Decoded, DecodeError> {
    let envelope: Envelope = serde_json::from_str(text)?;

    let (payload, nested) = match envelope.data {
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(value) => (value, NestedPayload::Decoded),
            Err(e) => (
                Value::String(raw),
                NestedPayload::Raw {
                    error: e.to_string(),
                },
            ),
        },
        other => (other, NestedPayload::NotNested),
    };

    Ok(Decoded {
        event: DecodedEvent::new(envelope.event, payload),
        nested,
    })
}

/// Decode one binary frame (UTF-8 text sent as binary).
pub fn decode_binary_frame(bytes: &[u8]) -> Result<Decoded, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8)?;
    decode_frame(text)
}
