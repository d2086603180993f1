//! Event handler registry.

use beacon_protocol::Event;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A callback for one event type. Receives the raw `data` payload.
pub type EventHandler = Arc<dyn Fn(&[u8]) -> anyhow::Result<()> + Send + Sync>;

/// Callbacks keyed by event type, kept in registration order.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: Arc<DashMap<String, Vec<EventHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `event_type`.
    pub fn add<F>(&self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(&[u8]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers
            .entry(event_type.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Number of handlers for `event_type`.
    #[must_use]
    pub fn count(&self, event_type: &str) -> usize {
        self.handlers.get(event_type).map_or(0, |h| h.len())
    }

    /// Run every handler registered for the event's type, in order.
    ///
    /// Returns the number of handlers invoked. A failing handler is logged
    /// and does not stop the ones after it.
    pub fn dispatch(&self, event: &Event) -> usize {
        // Clone out of the map so handlers may register more handlers.
        let Some(handlers) = self.handlers.get(&event.event_type).map(|h| h.clone()) else {
            debug!(event = %event.event_type, "No handler for event");
            return 0;
        };

        for handler in &handlers {
            if let Err(e) = handler(&event.data) {
                warn!(event = %event.event_type, error = %e, "Event handler failed");
            }
        }
        handlers.len()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("event_types", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_handlers_run_in_order_past_errors() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let calls = Arc::clone(&calls);
            registry.add("request", move |data: &[u8]| {
                calls.lock().push((n, data.to_vec()));
                if n == 1 {
                    anyhow::bail!("handler {n} failed");
                }
                Ok(())
            });
        }

        let invoked = registry.dispatch(&Event::new("request", &b"{\"id\":1}"[..]));
        assert_eq!(invoked, 3);

        let calls = calls.lock();
        assert_eq!(
            calls.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(calls.iter().all(|(_, data)| data == b"{\"id\":1}"));
    }

    #[test]
    fn test_unhandled_event_is_dropped() {
        let registry = HandlerRegistry::new();
        registry.add("request", |_: &[u8]| Ok(()));

        assert_eq!(registry.dispatch(&Event::new("other", &b"1"[..])), 0);
        assert_eq!(registry.count("request"), 1);
        assert_eq!(registry.count("other"), 0);
    }
}
