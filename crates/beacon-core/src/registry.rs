//! Bounded registry of active connections.
//!
//! Membership changes and snapshot reads share a single reader/writer lock,
//! so the capacity check and the insert are one atomic step. Done signals are
//! always fired after the lock is released.

use crate::connection::Connection;
use beacon_transport::ConnectionId;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry is full.
    #[error("Maximum connections ({max}) reached")]
    CapacityExceeded {
        /// Configured maximum.
        max: usize,
    },

    /// The connection's sink cannot push partial output.
    #[error("Streaming unsupported")]
    StreamingUnsupported,
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of simultaneously registered connections.
    pub max_connections: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
        }
    }
}

/// The set of currently registered connections.
pub struct Registry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    config: RegistryConfig,
}

impl Registry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating registry with config: {:?}", config);
        Self {
            connections: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Configured maximum connection count.
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.config.max_connections
    }

    /// Register a connection.
    ///
    /// A connection whose identifier is already registered replaces the old
    /// one, which is closed. The replaced entry does not count against the
    /// capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is full or the connection cannot stream.
    pub fn register(&self, connection: Arc<Connection>) -> Result<(), RegistryError> {
        if !connection.supports_streaming() {
            return Err(RegistryError::StreamingUnsupported);
        }

        let (replaced, count) = {
            let mut connections = self.connections.write();
            if !connections.contains_key(connection.id())
                && connections.len() >= self.config.max_connections
            {
                return Err(RegistryError::CapacityExceeded {
                    max: self.config.max_connections,
                });
            }
            let replaced = connections.insert(connection.id().clone(), Arc::clone(&connection));
            (replaced, connections.len())
        };

        if let Some(old) = replaced {
            if !Arc::ptr_eq(&old, &connection) && old.close() {
                debug!(connection = %old.id(), "Replaced existing connection");
            }
        }

        debug!(connection = %connection.id(), connections = count, "Registered");
        Ok(())
    }

    /// Remove a connection by identifier.
    ///
    /// Idempotent: returns `true` only if something was removed.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.connections.write().remove(id);
        match removed {
            Some(connection) => {
                connection.close();
                debug!(connection = %id, "Removed");
                true
            }
            None => false,
        }
    }

    /// Remove `connection` if it is still the registered instance for its ID.
    ///
    /// The connection is closed either way. Returns `true` if it was removed
    /// from the map.
    pub fn release(&self, connection: &Arc<Connection>) -> bool {
        let removed = {
            let mut connections = self.connections.write();
            match connections.get(connection.id()) {
                Some(current) if Arc::ptr_eq(current, connection) => {
                    connections.remove(connection.id())
                }
                _ => None,
            }
        };

        connection.close();
        if removed.is_some() {
            debug!(connection = %connection.id(), "Released");
        }
        removed.is_some()
    }

    /// Remove every connection, firing each done signal.
    ///
    /// Returns the number of connections closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.connections.write().drain().map(|(_, c)| c).collect();
        for connection in &drained {
            connection.close();
        }
        if !drained.is_empty() {
            info!(connections = drained.len(), "Closed all connections");
        }
        drained.len()
    }

    /// Get a registered connection.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    /// Check if an identifier is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.connections.read().contains_key(id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.read().len()
    }

    /// Identifiers of all registered connections.
    #[must_use]
    pub fn list(&self) -> Vec<ConnectionId> {
        self.connections.read().keys().cloned().collect()
    }

    /// All registered connections.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    /// The registered connections among `ids`, skipping unknown and repeated IDs.
    #[must_use]
    pub fn resolve<S: AsRef<str>>(&self, ids: &[S]) -> Vec<Arc<Connection>> {
        let connections = self.connections.read();
        let mut seen = HashSet::with_capacity(ids.len());
        ids.iter()
            .map(AsRef::as_ref)
            .filter(|id| seen.insert(*id))
            .filter_map(|id| connections.get(id).cloned())
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use beacon_transport::{ChannelSink, ChannelStream, EventSink, TransportError};
    use bytes::Bytes;

    fn connection(id: &str) -> (Arc<Connection>, ChannelStream) {
        let (sink, stream) = ChannelSink::pair(8);
        (Arc::new(Connection::new(id, sink)), stream)
    }

    fn registry(max_connections: usize) -> Registry {
        Registry::with_config(RegistryConfig { max_connections })
    }

    #[test]
    fn test_registry_capacity() {
        let registry = registry(3);
        let mut streams = Vec::new();

        for n in 0..3 {
            let (conn, stream) = connection(&format!("conn-{n}"));
            registry.register(conn).unwrap();
            streams.push(stream);
            assert_eq!(registry.count(), n + 1);
        }

        let (extra, _stream) = connection("conn-3");
        assert!(matches!(
            registry.register(extra),
            Err(RegistryError::CapacityExceeded { max: 3 })
        ));
        assert_eq!(registry.count(), 3);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = registry(10);
        let (conn, _stream) = connection("conn-1");
        registry.register(Arc::clone(&conn)).unwrap();

        assert!(registry.remove("conn-1"));
        assert!(conn.is_closed());
        assert!(!registry.remove("conn-1"));
        assert!(!registry.remove("never-registered"));
        assert_eq!(registry.count(), 0);
        // The done signal already fired during the first removal.
        assert!(!conn.close());
    }

    #[test]
    fn test_replacing_same_id_closes_old() {
        let registry = registry(1);
        let (old, _s1) = connection("agent");
        let (new, _s2) = connection("agent");

        registry.register(Arc::clone(&old)).unwrap();
        // Full, but the same ID replaces rather than grows.
        registry.register(Arc::clone(&new)).unwrap();

        assert!(old.is_closed());
        assert!(!new.is_closed());
        assert_eq!(registry.count(), 1);

        // A stale session cannot release its replacement.
        assert!(!registry.release(&old));
        assert!(registry.contains("agent"));
        assert!(registry.release(&new));
        assert!(!registry.contains("agent"));
    }

    #[test]
    fn test_snapshot_queries() {
        let registry = registry(10);
        let (a, _sa) = connection("a");
        let (b, _sb) = connection("b");
        registry.register(a).unwrap();
        registry.register(b).unwrap();

        let mut ids = registry.list();
        ids.sort();
        assert_eq!(ids, vec![ConnectionId::from("a"), ConnectionId::from("b")]);
        assert!(registry.contains("a"));
        assert!(registry.get("b").is_some());
        assert!(registry.get("c").is_none());

        let resolved = registry.resolve(&["a", "c", "a"]);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id().as_str(), "a");
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn test_close_all() {
        let registry = registry(10);
        let (a, _sa) = connection("a");
        let (b, _sb) = connection("b");
        registry.register(Arc::clone(&a)).unwrap();
        registry.register(Arc::clone(&b)).unwrap();

        assert_eq!(registry.close_all(), 2);
        assert_eq!(registry.count(), 0);
        assert!(a.is_closed() && b.is_closed());
    }

    struct BufferedOnly;

    #[async_trait]
    impl EventSink for BufferedOnly {
        async fn write(&mut self, _data: Bytes) -> Result<(), TransportError> {
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn supports_flush(&self) -> bool {
            false
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_streaming_unsupported() {
        let registry = registry(10);
        let conn = Arc::new(Connection::new("buffered", BufferedOnly));
        assert!(matches!(
            registry.register(conn),
            Err(RegistryError::StreamingUnsupported)
        ));
        assert_eq!(registry.count(), 0);
    }
}
