//! This instance's connection map.
//!
//! Only this instance's own tasks read or write it. Admission checks and the
//! insert happen under one lock, so the capacity limits hold under
//! concurrent handshakes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use conduit_core::{ConnectionId, RejectReason};
use parking_lot::RwLock;

use super::connection::Connection;

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    per_identity: HashMap<String, usize>,
}

/// Locally owned connections indexed by ID.
#[derive(Default)]
pub struct LocalConnectionMap {
    inner: RwLock<Inner>,
}

impl LocalConnectionMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `connection` if both the instance limit and the per-identity
    /// limit allow it.
    pub fn try_insert(
        &self,
        connection: Arc<Connection>,
        max_connections: usize,
        max_per_identity: usize,
    ) -> Result<(), RejectReason> {
        let mut inner = self.inner.write();
        if inner.connections.len() >= max_connections {
            return Err(RejectReason::ServerAtCapacity);
        }
        let user = connection.identity.user_id.clone();
        let held = inner.per_identity.get(&user).copied().unwrap_or(0);
        if held >= max_per_identity {
            return Err(RejectReason::ConnectionLimitExceeded);
        }
        let _ = inner.per_identity.insert(user, held + 1);
        let _ = inner.connections.insert(connection.id.clone(), connection);
        Ok(())
    }

    /// Remove a connection. `None` if it was not present.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let mut inner = self.inner.write();
        let removed = inner.connections.remove(id)?;
        let user = &removed.identity.user_id;
        if let Some(count) = inner.per_identity.get_mut(user) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                let _ = inner.per_identity.remove(user);
            }
        }
        Some(removed)
    }

    /// Look up a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.inner.read().connections.get(id).cloned()
    }

    /// Whether this instance owns `id`.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.inner.read().connections.contains_key(id)
    }

    /// Number of local connections.
    pub fn len(&self) -> usize {
        self.inner.read().connections.len()
    }

    /// Whether there are no local connections.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Connections held by one user.
    pub fn identity_count(&self, user_id: &str) -> usize {
        self.inner
            .read()
            .per_identity
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }

    /// Point-in-time copy of every connection.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.inner.read().connections.values().cloned().collect()
    }

    /// Local connection count per channel.
    pub fn count_by_channel(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for conn in self.inner.read().connections.values() {
            *counts.entry(conn.channel()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::rate_limit::RateLimiter;
    use assert_matches::assert_matches;
    use conduit_core::Identity;
    use tokio::sync::mpsc;

    fn conn(id: &str, user: &str, channel: &str) -> Arc<Connection> {
        let (tx, _rx) = mpsc::channel(4);
        Arc::new(Connection::new(
            ConnectionId::from(id),
            Identity::user(user),
            channel,
            tx,
            RateLimiter::new(10, 100),
        ))
    }

    #[test]
    fn insert_get_remove() {
        let map = LocalConnectionMap::new();
        map.try_insert(conn("conn_1", "alice", "guide"), 10, 5).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains(&ConnectionId::from("conn_1")));
        assert!(map.get(&ConnectionId::from("conn_1")).is_some());

        assert!(map.remove(&ConnectionId::from("conn_1")).is_some());
        assert!(map.remove(&ConnectionId::from("conn_1")).is_none());
        assert!(map.is_empty());
        assert_eq!(map.identity_count("alice"), 0);
    }

    #[test]
    fn instance_capacity_enforced() {
        let map = LocalConnectionMap::new();
        map.try_insert(conn("conn_1", "alice", "guide"), 2, 5).unwrap();
        map.try_insert(conn("conn_2", "bob", "guide"), 2, 5).unwrap();
        assert_matches!(
            map.try_insert(conn("conn_3", "carol", "guide"), 2, 5),
            Err(RejectReason::ServerAtCapacity)
        );
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn per_identity_limit_enforced_and_released() {
        let map = LocalConnectionMap::new();
        map.try_insert(conn("conn_1", "alice", "guide"), 10, 2).unwrap();
        map.try_insert(conn("conn_2", "alice", "guide"), 10, 2).unwrap();
        assert_matches!(
            map.try_insert(conn("conn_3", "alice", "guide"), 10, 2),
            Err(RejectReason::ConnectionLimitExceeded)
        );
        map.try_insert(conn("conn_4", "bob", "guide"), 10, 2).unwrap();

        let _ = map.remove(&ConnectionId::from("conn_1"));
        assert_eq!(map.identity_count("alice"), 1);
        map.try_insert(conn("conn_3", "alice", "guide"), 10, 2).unwrap();
    }

    #[test]
    fn counts_by_channel() {
        let map = LocalConnectionMap::new();
        map.try_insert(conn("conn_1", "a", "guide"), 10, 5).unwrap();
        map.try_insert(conn("conn_2", "b", "guide"), 10, 5).unwrap();
        map.try_insert(conn("conn_3", "c", "pillar:content"), 10, 5).unwrap();

        let counts = map.count_by_channel();
        assert_eq!(counts.get("guide"), Some(&2));
        assert_eq!(counts.get("pillar:content"), Some(&1));
        assert_eq!(map.snapshot().len(), 3);
    }
}
