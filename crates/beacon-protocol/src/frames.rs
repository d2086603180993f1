//! Event frames for the Beacon protocol.
//!
//! A frame is the exact byte sequence written to a stream for one event.
//! Payloads are compact JSON and therefore always fit on a single line.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Event type of the handshake frame sent first on every stream.
pub const CONNECTED_EVENT: &str = "connected";

/// Comment frame written periodically to keep idle streams open.
pub const KEEPALIVE: &[u8] = b": keepalive\n\n";

const EVENT_FIELD: &[u8] = b"event: ";
const DATA_FIELD: &[u8] = b"data: ";

/// Maximum event type length.
pub const MAX_EVENT_TYPE_LENGTH: usize = 256;

/// Validate an event type.
///
/// # Errors
///
/// Returns an error message if the event type cannot be carried on an
/// `event:` line.
pub fn validate_event_type(event_type: &str) -> Result<(), &'static str> {
    if event_type.is_empty() {
        return Err("event type cannot be empty");
    }
    if event_type.len() > MAX_EVENT_TYPE_LENGTH {
        return Err("event type too long");
    }
    if event_type.contains(['\r', '\n']) {
        return Err("event type cannot contain line breaks");
    }
    Ok(())
}

/// Encode one event block.
///
/// The caller is responsible for `event_type` passing [`validate_event_type`]
/// and `data` being free of line breaks.
#[must_use]
pub fn encode_event(event_type: &str, data: &[u8]) -> Bytes {
    let mut buf =
        BytesMut::with_capacity(EVENT_FIELD.len() + event_type.len() + DATA_FIELD.len() + data.len() + 3);
    buf.put_slice(EVENT_FIELD);
    buf.put_slice(event_type.as_bytes());
    buf.put_u8(b'\n');
    buf.put_slice(DATA_FIELD);
    buf.put_slice(data);
    buf.put_slice(b"\n\n");
    buf.freeze()
}

/// The keepalive comment frame.
#[must_use]
pub fn keepalive() -> Bytes {
    Bytes::from_static(KEEPALIVE)
}

/// A decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event type from the `event:` line.
    pub event_type: String,
    /// Raw payload bytes from the `data:` line.
    pub data: Bytes,
}

impl Event {
    /// Create a new event.
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
        }
    }

    /// Encode this event back into a frame.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        encode_event(&self.event_type, &self.data)
    }

    /// Whether this is the handshake event.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.event_type == CONNECTED_EVENT
    }

    /// Parse the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid JSON for `T`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }
}

/// Payload of the `connected` handshake event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedPayload {
    /// Identifier the server assigned to the stream.
    pub client_id: String,
}

impl ConnectedPayload {
    /// Create a new handshake payload.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_event() {
        let frame = encode_event("ping", br#"{"x":1}"#);
        assert_eq!(&frame[..], b"event: ping\ndata: {\"x\":1}\n\n");
    }

    #[test]
    fn test_event_type_validation() {
        assert!(validate_event_type("tick").is_ok());
        assert!(validate_event_type("scan:icmp").is_ok());
        assert!(validate_event_type("").is_err());
        assert!(validate_event_type("a\nb").is_err());
        assert!(validate_event_type("a\r").is_err());

        let long = "e".repeat(MAX_EVENT_TYPE_LENGTH + 1);
        assert!(validate_event_type(&long).is_err());
    }

    #[test]
    fn test_connected_payload_shape() {
        let json = serde_json::to_string(&ConnectedPayload::new("client-1")).unwrap();
        assert_eq!(json, r#"{"client_id":"client-1"}"#);
    }

    #[test]
    fn test_event_json() {
        let event = Event::new(CONNECTED_EVENT, r#"{"client_id":"abc"}"#);
        assert!(event.is_connected());
        let payload: ConnectedPayload = event.json().unwrap();
        assert_eq!(payload.client_id, "abc");
    }
}
