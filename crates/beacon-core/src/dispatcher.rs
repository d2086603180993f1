//! Message fan-out to registered connections.
//!
//! A send validates and encodes the message once, resolves its recipients
//! from the registry, and writes the shared frame to each of them under one
//! deadline. Recipients whose write fails are evicted.

use crate::connection::Connection;
use crate::message::Message;
use crate::registry::Registry;
use beacon_transport::TransportError;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

/// Dispatch errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The message failed validation.
    #[error("Invalid message: {0}")]
    InvalidMessage(&'static str),

    /// The payload could not be encoded.
    #[error("Failed to marshal message data: {0}")]
    Serialization(#[from] serde_json::Error),

    /// None of the requested identifiers is registered.
    #[error("No clients found from the specified IDs")]
    NoMatchingClients,

    /// Some recipients could not be reached and were evicted.
    #[error("Failed to deliver to {failed}/{total} clients: {source}")]
    PartialDeliveryFailure {
        /// Number of recipients that failed.
        failed: usize,
        /// Number of recipients attempted.
        total: usize,
        /// First underlying error.
        #[source]
        source: TransportError,
    },
}

impl DispatchError {
    /// Whether every attempted recipient failed by running out of time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            DispatchError::PartialDeliveryFailure {
                failed,
                total,
                source: TransportError::Timeout,
            } if failed == total
        )
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Deadline for a whole send operation.
    pub broadcast_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            broadcast_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of a successful send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Number of connections the frame was written to.
    pub recipients: usize,
    /// Whether the send targeted every connection.
    pub broadcast: bool,
}

/// Sends messages to connections in a [`Registry`].
pub struct Dispatcher {
    registry: Arc<Registry>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher over `registry`.
    #[must_use]
    pub fn new(registry: Arc<Registry>, config: DispatcherConfig) -> Self {
        Self { registry, config }
    }

    /// The registry this dispatcher sends through.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Send to every registered connection.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::send_within`].
    pub async fn broadcast(&self, message: &Message) -> Result<DeliveryReport, DispatchError> {
        self.send::<&str>(message, &[]).await
    }

    /// Send to `targets`, or to everyone if `targets` is empty.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::send_within`].
    pub async fn send<S: AsRef<str>>(
        &self,
        message: &Message,
        targets: &[S],
    ) -> Result<DeliveryReport, DispatchError> {
        self.send_within(message, targets, self.config.broadcast_timeout)
            .await
    }

    /// Send with a deadline of `timeout`, capped at the configured broadcast
    /// timeout.
    ///
    /// Unknown targets are skipped silently. Recipients that fail or miss the
    /// deadline are removed from the registry before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is invalid, no target is registered, or
    /// any recipient failed.
    pub async fn send_within<S: AsRef<str>>(
        &self,
        message: &Message,
        targets: &[S],
        timeout: Duration,
    ) -> Result<DeliveryReport, DispatchError> {
        message.validate().map_err(DispatchError::InvalidMessage)?;
        let frame = message.encode()?;

        let broadcast = targets.is_empty();
        let recipients = if broadcast {
            self.registry.snapshot()
        } else {
            self.registry.resolve(targets)
        };

        if recipients.is_empty() {
            if broadcast {
                trace!(event = %message.event_type(), "Broadcast with no connections");
                return Ok(DeliveryReport {
                    recipients: 0,
                    broadcast,
                });
            }
            return Err(DispatchError::NoMatchingClients);
        }

        self.deliver_all(message, frame, recipients, broadcast, timeout)
            .await
    }

    /// Send to one already resolved connection, with the same deadline and
    /// eviction rules as [`Dispatcher::send_within`].
    ///
    /// Unlike a targeted send this never looks the identifier up, so it
    /// cannot reach a different connection registered under the same ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is invalid or the write failed.
    pub async fn send_to_connection(
        &self,
        message: &Message,
        connection: &Arc<Connection>,
        timeout: Duration,
    ) -> Result<DeliveryReport, DispatchError> {
        message.validate().map_err(DispatchError::InvalidMessage)?;
        let frame = message.encode()?;

        self.deliver_all(message, frame, vec![Arc::clone(connection)], false, timeout)
            .await
    }

    async fn deliver_all(
        &self,
        message: &Message,
        frame: Bytes,
        recipients: Vec<Arc<Connection>>,
        broadcast: bool,
        timeout: Duration,
    ) -> Result<DeliveryReport, DispatchError> {
        let total = recipients.len();
        let deadline = Instant::now() + timeout.min(self.config.broadcast_timeout);

        let failures = if total == 1 {
            let connection = &recipients[0];
            match deliver(connection, frame, deadline).await {
                Ok(()) => Vec::new(),
                Err(e) => vec![(Arc::clone(connection), e)],
            }
        } else {
            fan_out(recipients, frame, deadline).await
        };

        if failures.is_empty() {
            trace!(event = %message.event_type(), recipients = total, "Delivered");
            return Ok(DeliveryReport {
                recipients: total,
                broadcast,
            });
        }

        for (connection, e) in &failures {
            warn!(connection = %connection.id(), error = %e, "Failed to send, evicting");
            self.registry.release(connection);
        }

        let failed = failures.len();
        let source = failures
            .into_iter()
            .next()
            .map(|(_, e)| e)
            .unwrap_or(TransportError::ConnectionClosed);

        debug!(
            event = %message.event_type(),
            failed,
            total,
            "Delivery incomplete"
        );

        Err(DispatchError::PartialDeliveryFailure {
            failed,
            total,
            source,
        })
    }
}

/// Write `frame` to one connection before `deadline`.
async fn deliver(
    connection: &Connection,
    frame: Bytes,
    deadline: Instant,
) -> Result<(), TransportError> {
    match tokio::time::timeout_at(deadline, connection.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout),
    }
}

/// Write `frame` to every recipient concurrently, one task each.
async fn fan_out(
    recipients: Vec<Arc<Connection>>,
    frame: Bytes,
    deadline: Instant,
) -> Vec<(Arc<Connection>, TransportError)> {
    let mut tasks = JoinSet::new();
    for connection in recipients {
        let frame = frame.clone();
        tasks.spawn(async move {
            let result = deliver(&connection, frame, deadline).await;
            (connection, result)
        });
    }

    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((connection, Err(e))) => failures.push((connection, e)),
            Err(e) => error!(error = %e, "Delivery task failed"),
        }
    }
    failures
}
