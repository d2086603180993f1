//! A registered stream.

use beacon_transport::{ConnectionId, EventSink, TransportError};
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::trace;

/// A long-lived stream to one client.
///
/// All writes go through [`Connection::send`], which holds the connection's
/// write lock for the whole write-and-flush so frames from the dispatcher and
/// the pinger never interleave.
pub struct Connection {
    id: ConnectionId,
    sink: Mutex<Box<dyn EventSink>>,
    streaming: bool,
    done: CancellationToken,
    closed: AtomicBool,
    connected_at: Instant,
}

impl Connection {
    /// Create a connection over `sink`.
    #[must_use]
    pub fn new(id: impl Into<ConnectionId>, sink: impl EventSink + 'static) -> Self {
        let streaming = sink.supports_flush();
        Self {
            id: id.into(),
            sink: Mutex::new(Box::new(sink)),
            streaming,
            done: CancellationToken::new(),
            closed: AtomicBool::new(false),
            connected_at: Instant::now(),
        }
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Whether the sink can stream partial output.
    #[must_use]
    pub fn supports_streaming(&self) -> bool {
        self.streaming
    }

    /// Time since the connection was created.
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }

    /// Write one frame and flush it.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer is gone.
    pub async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        trace!(connection = %self.id, bytes = frame.len(), "Writing frame");
        sink.write(frame).await?;
        sink.flush().await
    }

    /// Resolves once the connection has been closed.
    pub fn done(&self) -> WaitForCancellationFuture<'_> {
        self.done.cancelled()
    }

    /// Check if the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Fire the done signal.
    ///
    /// Returns `true` only for the call that actually closed the connection.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.done.cancel();
        true
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_transport::ChannelSink;

    #[tokio::test]
    async fn test_send_flushes_frame() {
        let (sink, mut stream) = ChannelSink::pair(4);
        let conn = Connection::new("conn-1", sink);

        conn.send(Bytes::from_static(b": keepalive\n\n")).await.unwrap();
        assert_eq!(&stream.recv().await.unwrap()[..], b": keepalive\n\n");
    }

    #[tokio::test]
    async fn test_close_fires_once() {
        let (sink, _stream) = ChannelSink::pair(4);
        let conn = Connection::new("conn-1", sink);

        assert!(!conn.is_closed());
        assert!(conn.close());
        assert!(!conn.close());
        assert!(conn.is_closed());

        // Resolves immediately once closed.
        conn.done().await;
    }

    #[tokio::test]
    async fn test_send_to_gone_peer_fails() {
        let (sink, stream) = ChannelSink::pair(4);
        let conn = Connection::new("conn-1", sink);
        drop(stream);

        assert!(conn.send(Bytes::from_static(b"x")).await.is_err());
    }
}
