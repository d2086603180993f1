//! Outbound message type.

use beacon_protocol::{encode_event, validate_event_type, CONNECTED_EVENT};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

/// An event to push to one or more connections.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    event_type: String,
    data: Value,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// Create a message from any serializable payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented as JSON.
    pub fn from_serializable<T: Serialize>(
        event_type: impl Into<String>,
        data: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event_type, serde_json::to_value(data)?))
    }

    /// The handshake message announcing `client_id` to its own stream.
    #[must_use]
    pub fn connected(client_id: &str) -> Self {
        Self::new(CONNECTED_EVENT, serde_json::json!({ "client_id": client_id }))
    }

    /// Get the event type.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Get the payload.
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Check required fields.
    ///
    /// # Errors
    ///
    /// Returns a reason if the event type is unusable or the payload is null.
    pub fn validate(&self) -> Result<(), &'static str> {
        validate_event_type(&self.event_type)?;
        if self.data.is_null() {
            return Err("data cannot be null");
        }
        Ok(())
    }

    /// Encode the message as a single wire frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload fails to serialize.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        let payload = serde_json::to_vec(&self.data)?;
        Ok(encode_event(&self.event_type, &payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_encode() {
        let msg = Message::new("tick", json!({"n": 1}));
        assert_eq!(&msg.encode().unwrap()[..], b"event: tick\ndata: {\"n\":1}\n\n");
    }

    #[test]
    fn test_message_validation() {
        assert!(Message::new("tick", json!(1)).validate().is_ok());
        assert!(Message::new("", json!(1)).validate().is_err());
        assert!(Message::new("tick", Value::Null).validate().is_err());
        assert!(Message::new("ti\nck", json!(1)).validate().is_err());
    }

    #[test]
    fn test_multiline_strings_stay_on_one_line() {
        let msg = Message::new("log", json!({"text": "line one\nline two"}));
        let frame = msg.encode().unwrap();
        // Only the three protocol newlines remain.
        assert_eq!(frame.iter().filter(|&&b| b == b'\n').count(), 3);
    }

    #[test]
    fn test_connected_message() {
        let msg = Message::connected("client-1");
        assert_eq!(msg.event_type(), "connected");
        assert_eq!(msg.data(), &json!({"client_id": "client-1"}));
    }

    #[test]
    fn test_from_serializable() {
        #[derive(Serialize)]
        struct Scan {
            count: u32,
        }

        let msg = Message::from_serializable("request", &Scan { count: 3 }).unwrap();
        assert_eq!(msg.data(), &json!({"count": 3}));
    }
}
