//! The process-wide map from client identifier to its live connection.

use std::sync::Arc;

use dashmap::DashMap;

use crate::connection::ConnRef;

/// Maps MQTT client identifiers to the connection currently representing
/// them. Only one connection may hold a given client ID at a time.
pub struct ClientRegistry {
    connections: DashMap<Arc<str>, ConnRef>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Install `conn` as the connection for `client_id`, returning whatever
    /// connection previously held that ID, if any.
    ///
    /// The previous connection is captured and returned *before* `conn` is
    /// installed, so a caller that reacts to the displaced connection (by
    /// disconnecting it) never races with a third CONNECT for the same ID
    /// landing in between the capture and the install.
    pub fn register(&self, client_id: Arc<str>, conn: ConnRef) -> Option<ConnRef> {
        let previous = self.connections.get(&client_id).map(|entry| entry.clone());
        self.connections.insert(client_id, conn);
        previous
    }

    /// Remove `client_id` from the registry, but only if it still maps to
    /// `conn`. A displaced connection's writer task deregistering after the
    /// fact must not be allowed to evict the connection that replaced it.
    pub fn deregister(&self, client_id: &str, conn: &ConnRef) {
        self.connections.remove_if(client_id, |_, current| {
            std::sync::Arc::ptr_eq(current, conn)
        });
    }

    pub fn get(&self, client_id: &str) -> Option<ConnRef> {
        self.connections.get(client_id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::fake_connection;

    #[test]
    fn register_returns_none_for_a_fresh_client_id() {
        let registry = ClientRegistry::new();
        let conn = fake_connection("a");
        assert!(registry.register(Arc::from("a"), conn).is_none());
    }

    #[test]
    fn register_returns_the_displaced_connection() {
        let registry = ClientRegistry::new();
        let first = fake_connection("a");
        let second = fake_connection("a");

        registry.register(Arc::from("a"), first.clone());
        let displaced = registry.register(Arc::from("a"), second.clone());

        assert!(displaced.is_some());
        assert!(ConnRef::ptr_eq(&displaced.unwrap(), &first));
        assert!(ConnRef::ptr_eq(&registry.get("a").unwrap(), &second));
    }

    #[test]
    fn deregister_ignores_a_since_superseded_connection() {
        let registry = ClientRegistry::new();
        let first = fake_connection("a");
        let second = fake_connection("a");

        registry.register(Arc::from("a"), first.clone());
        registry.register(Arc::from("a"), second.clone());

        // The displaced connection's writer deregisters using its own
        // stale handle; it must not evict the connection that replaced it.
        registry.deregister("a", &first);

        assert!(ConnRef::ptr_eq(&registry.get("a").unwrap(), &second));
    }

    #[test]
    fn deregister_removes_the_current_connection() {
        let registry = ClientRegistry::new();
        let conn = fake_connection("a");
        registry.register(Arc::from("a"), conn.clone());

        registry.deregister("a", &conn);

        assert!(registry.get("a").is_none());
    }
}
