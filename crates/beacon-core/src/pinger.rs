//! Keepalive comments for idle streams.

use crate::connection::Connection;
use crate::registry::Registry;
use beacon_protocol::keepalive;
use beacon_transport::TransportError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Why a pinger stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingerResult {
    /// The connection was closed.
    Closed,
    /// The owning request was cancelled.
    Cancelled,
    /// A keepalive write failed and the connection was evicted.
    WriteFailed,
}

/// Write a keepalive comment to `connection` every `interval`.
///
/// The first comment goes out one interval after start. A failed write evicts
/// the connection from `registry`, exactly as a failed send would. A write
/// still pending after one interval counts as failed, and a pending write
/// never delays the done or cancel signals.
pub async fn run_pinger(
    connection: Arc<Connection>,
    registry: Arc<Registry>,
    interval: Duration,
    cancel: CancellationToken,
) -> PingerResult {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            () = connection.done() => return PingerResult::Closed,
            () = cancel.cancelled() => return PingerResult::Cancelled,
            _ = ticker.tick() => {
                let write = time::timeout(interval, connection.send(keepalive()));
                let result = tokio::select! {
                    biased;

                    () = connection.done() => return PingerResult::Closed,
                    () = cancel.cancelled() => return PingerResult::Cancelled,
                    result = write => result.unwrap_or(Err(TransportError::Timeout)),
                };

                if let Err(e) = result {
                    warn!(connection = %connection.id(), error = %e, "Keepalive failed, evicting");
                    registry.release(&connection);
                    return PingerResult::WriteFailed;
                }
                trace!(connection = %connection.id(), "Keepalive sent");
            }
        }
    }
}
