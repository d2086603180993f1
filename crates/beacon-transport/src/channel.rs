//! Channel-backed sink implementation.
//!
//! [`ChannelSink`] buffers writes and hands each flushed chunk to a bounded
//! channel. The receiving half, [`ChannelStream`], is a `Stream` of byte
//! chunks suitable as an HTTP streaming response body. When the HTTP layer
//! drops the body (the peer disconnected), every later flush fails.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::trace;

use crate::traits::{EventSink, TransportError};

/// Default number of flushed chunks buffered before writers wait.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Sink that forwards flushed output over a bounded channel.
#[derive(Debug)]
pub struct ChannelSink {
    sender: mpsc::Sender<Bytes>,
    pending: BytesMut,
}

impl ChannelSink {
    /// Create a connected sink and body stream.
    #[must_use]
    pub fn pair(capacity: usize) -> (Self, ChannelStream) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let sink = Self {
            sender,
            pending: BytesMut::new(),
        };
        let stream = ChannelStream {
            receiver,
            guard: None,
        };
        (sink, stream)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn write(&mut self, data: Bytes) -> Result<(), TransportError> {
        if self.sender.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        self.pending.extend_from_slice(&data);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let chunk = self.pending.split().freeze();
        trace!(bytes = chunk.len(), "Flushing chunk");
        self.sender
            .send(chunk)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Receiving half of a [`ChannelSink`].
#[derive(Debug)]
pub struct ChannelStream {
    receiver: mpsc::Receiver<Bytes>,
    guard: Option<DropGuard>,
}

impl ChannelStream {
    /// Cancel `token` when this stream is dropped.
    ///
    /// The HTTP layer drops the body once the peer goes away, so the token
    /// doubles as the request's cancellation signal.
    #[must_use]
    pub fn cancel_on_drop(mut self, token: CancellationToken) -> Self {
        self.guard = Some(token.drop_guard());
        self
    }

    /// Receive the next flushed chunk.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Receive a chunk if one is ready.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for ChannelStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
