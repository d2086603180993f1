//! Bounded queue between the stream reader and the handler worker.
//!
//! Reading never runs user callbacks. Decoded events are pushed here and a
//! separate worker drains them in order, so a slow handler only affects the
//! queue, not the connection.

use crate::config::Backpressure;
use crate::handlers::HandlerRegistry;
use beacon_protocol::Event;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Producer half, owned by the reader.
#[derive(Debug)]
pub enum EventSender {
    /// Ring buffer that overwrites the oldest entry when full.
    Ring(broadcast::Sender<Event>),
    /// Bounded channel where the producer waits for space.
    Bounded {
        /// Channel sender.
        sender: mpsc::Sender<Event>,
        /// Longest wait for space.
        timeout: Duration,
    },
}

/// Consumer half, owned by the worker.
#[derive(Debug)]
pub enum EventReceiver {
    /// See [`EventSender::Ring`].
    Ring(broadcast::Receiver<Event>),
    /// See [`EventSender::Bounded`].
    Bounded(mpsc::Receiver<Event>),
}

/// Create a queue of `capacity` events with the given policy.
#[must_use]
pub fn event_queue(capacity: usize, backpressure: Backpressure) -> (EventSender, EventReceiver) {
    let capacity = capacity.max(1);
    match backpressure {
        Backpressure::DropOldest => {
            let (sender, receiver) = broadcast::channel(capacity);
            (EventSender::Ring(sender), EventReceiver::Ring(receiver))
        }
        Backpressure::Block { timeout } => {
            let (sender, receiver) = mpsc::channel(capacity);
            (
                EventSender::Bounded { sender, timeout },
                EventReceiver::Bounded(receiver),
            )
        }
    }
}

impl EventSender {
    /// Queue an event. Returns `false` if it was dropped.
    pub async fn push(&self, event: Event) -> bool {
        match self {
            EventSender::Ring(sender) => sender.send(event).is_ok(),
            EventSender::Bounded { sender, timeout } => {
                match sender.send_timeout(event, *timeout).await {
                    Ok(()) => true,
                    Err(mpsc::error::SendTimeoutError::Timeout(event)) => {
                        warn!(event = %event.event_type, "Handler queue full, dropping event");
                        false
                    }
                    Err(mpsc::error::SendTimeoutError::Closed(_)) => false,
                }
            }
        }
    }
}

impl EventReceiver {
    /// The next queued event, or `None` once the sender is gone and the queue
    /// is drained.
    pub async fn next(&mut self) -> Option<Event> {
        match self {
            EventReceiver::Ring(receiver) => loop {
                match receiver.recv().await {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Handlers fell behind, oldest events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            EventReceiver::Bounded(receiver) => receiver.recv().await,
        }
    }
}

/// Run handlers for queued events until the queue closes or `cancel` fires.
pub async fn run_worker(
    mut receiver: EventReceiver,
    handlers: HandlerRegistry,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;

            () = cancel.cancelled() => break,
            event = receiver.next() => match event {
                Some(event) => event,
                None => break,
            },
        };

        trace!(event = %event.event_type, bytes = event.data.len(), "Dispatching event");
        handlers.dispatch(&event);
    }
    debug!("Handler worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: usize) -> Event {
        Event::new("tick", n.to_string())
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_newest() {
        let (sender, mut receiver) = event_queue(2, Backpressure::DropOldest);

        for n in 0..5 {
            assert!(sender.push(event(n)).await);
        }
        drop(sender);

        let mut seen = Vec::new();
        while let Some(event) = receiver.next().await {
            seen.push(event.data);
        }
        assert_eq!(seen, vec!["3", "4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_times_out_and_drops() {
        let timeout = Duration::from_millis(50);
        let (sender, mut receiver) = event_queue(1, Backpressure::Block { timeout });

        assert!(sender.push(event(0)).await);
        // Full, nobody draining.
        assert!(!sender.push(event(1)).await);

        assert_eq!(receiver.next().await.unwrap().data, "0");
        assert!(sender.push(event(2)).await);
        assert_eq!(receiver.next().await.unwrap().data, "2");
    }

    #[tokio::test]
    async fn test_worker_preserves_order() {
        let handlers = HandlerRegistry::new();
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&seen);
        handlers.add("tick", move |data: &[u8]| {
            sink.lock().push(String::from_utf8_lossy(data).into_owned());
            Ok(())
        });

        let (sender, receiver) = event_queue(16, Backpressure::default());
        let worker = tokio::spawn(run_worker(receiver, handlers, CancellationToken::new()));

        for n in 0..10 {
            sender.push(event(n)).await;
        }
        drop(sender);
        worker.await.unwrap();

        let expected: Vec<String> = (0..10).map(|n| n.to_string()).collect();
        assert_eq!(*seen.lock(), expected);
    }

    #[tokio::test]
    async fn test_worker_stops_on_cancel() {
        let (_sender, receiver) = event_queue(4, Backpressure::DropOldest);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_worker(receiver, HandlerRegistry::new(), cancel.clone()));

        cancel.cancel();
        worker.await.unwrap();
    }
}
