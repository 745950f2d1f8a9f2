//! Process-wide registry of live client connections.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::runtime::MessageProcessor;

/// Inbound-traffic timestamps for one connection, shared between the
/// read loop (writer) and the heartbeat task (reader).
pub struct ConnectionHealth {
    last_inbound_at: Mutex<DateTime<Utc>>,
    last_pong_at: Mutex<DateTime<Utc>>,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHealth {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            last_inbound_at: Mutex::new(now),
            last_pong_at: Mutex::new(now),
        }
    }

    /// Any inbound frame counts against the inactivity timeout.
    pub fn touch_inbound(&self) {
        *self.last_inbound_at.lock() = Utc::now();
    }

    /// A `pong` additionally refreshes the heartbeat deadline.
    pub fn touch_pong(&self) {
        let now = Utc::now();
        *self.last_pong_at.lock() = now;
        *self.last_inbound_at.lock() = now;
    }

    pub fn pong_age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(*self.last_pong_at.lock())
    }

    pub fn inbound_age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(*self.last_inbound_at.lock())
    }
}

/// One live connection.
pub struct ConnectionEntry {
    pub connection_id: String,
    pub authorized: bool,
    pub user_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub health: Arc<ConnectionHealth>,
    /// Present once the connection is authorized.
    pub processor: Option<Arc<MessageProcessor>>,
}

/// Mutex-guarded map of all live connections, keyed by `connection_id`.
/// Turn state is never shared across connections; this registry only
/// tracks lifecycle.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, ConnectionEntry>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Record a freshly accepted (not yet authorized) connection.
    pub fn register(&self, connection_id: &str, health: Arc<ConnectionHealth>) {
        self.connections.write().insert(
            connection_id.to_owned(),
            ConnectionEntry {
                connection_id: connection_id.to_owned(),
                authorized: false,
                user_id: None,
                connected_at: Utc::now(),
                health,
                processor: None,
            },
        );
        tracing::info!(connection_id, "connection registered");
    }

    /// Flip the connection to authorized and attach its processor.
    pub fn mark_authorized(&self, connection_id: &str, processor: Arc<MessageProcessor>) {
        if let Some(entry) = self.connections.write().get_mut(connection_id) {
            entry.authorized = true;
            entry.processor = Some(processor);
        }
    }

    /// Record the user id once the first chat message reveals it.
    pub fn set_user(&self, connection_id: &str, user_id: &str) {
        if let Some(entry) = self.connections.write().get_mut(connection_id) {
            if entry.user_id.is_none() {
                entry.user_id = Some(user_id.to_owned());
            }
        }
    }

    pub fn remove(&self, connection_id: &str) {
        if self.connections.write().remove(connection_id).is_some() {
            tracing::info!(connection_id, "connection removed");
        }
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.read().contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_remove() {
        let reg = ConnectionRegistry::new();
        let health = Arc::new(ConnectionHealth::new());
        reg.register("c1", health);
        assert!(reg.contains("c1"));
        assert_eq!(reg.len(), 1);

        reg.remove("c1");
        assert!(reg.is_empty());
        // Second remove does not panic.
        reg.remove("c1");
    }

    #[test]
    fn set_user_keeps_first_value() {
        let reg = ConnectionRegistry::new();
        reg.register("c1", Arc::new(ConnectionHealth::new()));
        reg.set_user("c1", "alice");
        reg.set_user("c1", "mallory");
        let users = reg.connections.read();
        assert_eq!(users.get("c1").unwrap().user_id.as_deref(), Some("alice"));
    }

    #[test]
    fn health_ages_move_forward() {
        let health = ConnectionHealth::new();
        assert!(health.pong_age() >= chrono::Duration::zero());
        health.touch_pong();
        assert!(health.pong_age() < chrono::Duration::seconds(1));
        assert!(health.inbound_age() < chrono::Duration::seconds(1));
    }
}
