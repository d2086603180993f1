//! Sink abstraction traits for Beacon.
//!
//! These traits define the interface every stream output must provide, so the
//! registry and dispatcher stay independent of the HTTP framework.

use async_trait::async_trait;
use bytes::Bytes;
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a connection ID from a caller-supplied value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("client-{}", uuid::Uuid::new_v4()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for ConnectionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Transport errors.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The peer is gone.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The write did not complete before the deadline.
    #[error("Write timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// An output that framed bytes are written to.
///
/// Writes may be buffered until [`EventSink::flush`] is called. Callers
/// serialize access themselves; a sink is never written concurrently.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Buffer framed bytes for the peer.
    async fn write(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Push buffered bytes to the peer.
    async fn flush(&mut self) -> Result<(), TransportError>;

    /// Whether the sink can push partial output before the response ends.
    fn supports_flush(&self) -> bool {
        true
    }

    /// Check if the peer is still attached.
    fn is_open(&self) -> bool;
}
