//! Live connections per user.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::protocol::ServerEvent;
use crate::util::id::{ConnectionId, UserId};

/// Sending half of a connection's writer task.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

struct Entry {
    user_id: UserId,
    outbox: Outbox,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Entry>,
    by_user: DashMap<UserId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, conn: ConnectionId, user_id: &str, outbox: Outbox) {
        self.by_user.entry(user_id.to_owned()).or_default().insert(conn.clone());
        self.connections.insert(conn, Entry { user_id: user_id.to_owned(), outbox });
    }

    /// Returns the user the connection belonged to.
    pub fn detach(&self, conn: &ConnectionId) -> Option<UserId> {
        let (_, entry) = self.connections.remove(conn)?;
        self.by_user.remove_if_mut(&entry.user_id, |_, set| {
            set.remove(conn);
            set.is_empty()
        });
        Some(entry.user_id)
    }

    pub fn contains(&self, conn: &ConnectionId) -> bool {
        self.connections.contains_key(conn)
    }

    pub fn user_of(&self, conn: &ConnectionId) -> Option<UserId> {
        self.connections.get(conn).map(|e| e.user_id.clone())
    }

    pub fn connections_of(&self, user_id: &str) -> Vec<ConnectionId> {
        self.by_user
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn send_to_connection(&self, conn: &ConnectionId, event: ServerEvent) -> bool {
        let Some(entry) = self.connections.get(conn) else {
            return false;
        };
        if entry.outbox.send(event).is_err() {
            tracing::debug!(conn_id = %conn, "outbox closed, dropping event");
            return false;
        }
        true
    }

    /// Fan out to every open connection of `user_id`. Nothing is queued for
    /// users without connections.
    pub fn send_to_user(&self, user_id: &str, event: &ServerEvent) -> usize {
        let conns = self.connections_of(user_id);
        if conns.is_empty() {
            tracing::debug!(user_id, event = event.name(), "user offline, event dropped");
            return 0;
        }
        conns
            .iter()
            .filter(|c| self.send_to_connection(c, event.clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> ServerEvent {
        ServerEvent::error("x")
    }

    #[test]
    fn fans_out_to_every_device() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.attach(ConnectionId::new(), "u1", tx1);
        registry.attach(ConnectionId::new(), "u1", tx2);

        assert_eq!(registry.send_to_user("u1", &event()), 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn offline_user_gets_nothing() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.send_to_user("ghost", &event()), 0);
    }

    #[test]
    fn detach_forgets_connection() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ConnectionId::new();
        registry.attach(conn.clone(), "u1", tx);

        assert_eq!(registry.detach(&conn).as_deref(), Some("u1"));
        assert!(registry.connections_of("u1").is_empty());
        assert!(registry.is_empty());
        assert_eq!(registry.detach(&conn), None);
    }
}
