//! Room subscriptions and call presence.
//!
//! Handlers only talk to [`RoomDirectory`]; [`LocalRooms`] keeps everything in
//! process memory. A clustered deployment swaps in an implementation backed by
//! a shared pub/sub layer.

use std::collections::{HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use super::registry::{ConnectionRegistry, Outbox};
use crate::protocol::ServerEvent;
use crate::util::id::{ConnectionId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    Conversation(Uuid),
    Call(String),
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomKey::Conversation(id) => write!(f, "conversation:{id}"),
            RoomKey::Call(id) => write!(f, "call:{id}"),
        }
    }
}

/// Result of a connection entering a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEntry {
    /// Everyone else in the call, sorted.
    pub peers: Vec<UserId>,
    /// `false` when another connection of the same user was already in.
    pub newly_present: bool,
}

/// An identity that lost its last connection in a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDeparture {
    pub call_id: String,
    pub user_id: UserId,
}

#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn attach(&self, conn: &ConnectionId, user_id: &str, outbox: Outbox);

    /// Drop every subscription and call presence held by `conn`. The returned
    /// departures still need to be announced to their call rooms.
    async fn detach(&self, conn: &ConnectionId) -> Vec<CallDeparture>;

    async fn send_to_user(&self, user_id: &str, event: ServerEvent) -> usize;

    async fn send_to_connection(&self, conn: &ConnectionId, event: ServerEvent) -> bool;

    /// Returns `false` if the connection is no longer attached.
    async fn join(&self, room: &RoomKey, conn: &ConnectionId) -> bool;

    /// Subscribe every live connection of `user_id`; returns how many.
    async fn join_user(&self, room: &RoomKey, user_id: &str) -> usize;

    async fn leave(&self, room: &RoomKey, conn: &ConnectionId);

    async fn is_subscribed(&self, room: &RoomKey, conn: &ConnectionId) -> bool;

    /// Deliver to every subscriber of `room` except `skip`.
    async fn publish(&self, room: &RoomKey, event: ServerEvent, skip: Option<&ConnectionId>) -> usize;

    async fn enter_call(&self, call_id: &str, user_id: &str, conn: &ConnectionId) -> CallEntry;

    /// Returns `true` when `user_id` has no connection left in the call.
    async fn exit_call(&self, call_id: &str, user_id: &str, conn: &ConnectionId) -> bool;

    async fn call_participants(&self, call_id: &str) -> Vec<UserId>;
}

// call id -> user id -> that user's connections in the call
type CallTable = HashMap<String, HashMap<UserId, HashSet<ConnectionId>>>;

#[derive(Default)]
pub struct LocalRooms {
    registry: ConnectionRegistry,
    subscribers: DashMap<RoomKey, HashSet<ConnectionId>>,
    joined: DashMap<ConnectionId, HashSet<RoomKey>>,
    calls: Mutex<CallTable>,
}

impl LocalRooms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn subscribe(&self, room: &RoomKey, conn: &ConnectionId) -> bool {
        if !self.registry.contains(conn) {
            return false;
        }
        self.subscribers.entry(room.clone()).or_default().insert(conn.clone());
        self.joined.entry(conn.clone()).or_default().insert(room.clone());
        // A detach that ran between the check and the inserts has already
        // swept this connection; undo so nothing is left behind.
        if !self.registry.contains(conn) {
            self.unsubscribe(room, conn);
            self.joined.remove_if_mut(conn, |_, rooms| {
                rooms.remove(room);
                rooms.is_empty()
            });
            return false;
        }
        true
    }

    fn unsubscribe(&self, room: &RoomKey, conn: &ConnectionId) {
        self.subscribers.remove_if_mut(room, |_, set| {
            set.remove(conn);
            set.is_empty()
        });
    }
}

#[async_trait]
impl RoomDirectory for LocalRooms {
    async fn attach(&self, conn: &ConnectionId, user_id: &str, outbox: Outbox) {
        self.registry.attach(conn.clone(), user_id, outbox);
    }

    async fn detach(&self, conn: &ConnectionId) -> Vec<CallDeparture> {
        self.registry.detach(conn);
        if let Some((_, rooms)) = self.joined.remove(conn) {
            for room in &rooms {
                self.unsubscribe(room, conn);
            }
        }

        let mut departures = Vec::new();
        let mut calls = self.calls.lock();
        calls.retain(|call_id, users| {
            users.retain(|user_id, conns| {
                if conns.remove(conn) && conns.is_empty() {
                    departures.push(CallDeparture { call_id: call_id.clone(), user_id: user_id.clone() });
                    return false;
                }
                true
            });
            !users.is_empty()
        });
        departures
    }

    async fn send_to_user(&self, user_id: &str, event: ServerEvent) -> usize {
        self.registry.send_to_user(user_id, &event)
    }

    async fn send_to_connection(&self, conn: &ConnectionId, event: ServerEvent) -> bool {
        self.registry.send_to_connection(conn, event)
    }

    async fn join(&self, room: &RoomKey, conn: &ConnectionId) -> bool {
        self.subscribe(room, conn)
    }

    async fn join_user(&self, room: &RoomKey, user_id: &str) -> usize {
        self.registry
            .connections_of(user_id)
            .iter()
            .filter(|c| self.subscribe(room, c))
            .count()
    }

    async fn leave(&self, room: &RoomKey, conn: &ConnectionId) {
        self.unsubscribe(room, conn);
        if let Some(mut rooms) = self.joined.get_mut(conn) {
            rooms.remove(room);
        }
    }

    async fn is_subscribed(&self, room: &RoomKey, conn: &ConnectionId) -> bool {
        self.subscribers.get(room).is_some_and(|set| set.contains(conn))
    }

    async fn publish(&self, room: &RoomKey, event: ServerEvent, skip: Option<&ConnectionId>) -> usize {
        let targets: Vec<ConnectionId> = match self.subscribers.get(room) {
            Some(set) => set.iter().filter(|c| Some(*c) != skip).cloned().collect(),
            None => return 0,
        };
        let delivered = targets
            .iter()
            .filter(|c| self.registry.send_to_connection(c, event.clone()))
            .count();
        tracing::trace!(%room, event = event.name(), delivered, "published");
        delivered
    }

    async fn enter_call(&self, call_id: &str, user_id: &str, conn: &ConnectionId) -> CallEntry {
        let mut calls = self.calls.lock();
        let users = calls.entry(call_id.to_owned()).or_default();
        let mut peers: Vec<UserId> = users.keys().filter(|u| *u != user_id).cloned().collect();
        peers.sort();
        let conns = users.entry(user_id.to_owned()).or_default();
        let newly_present = conns.is_empty();
        conns.insert(conn.clone());
        CallEntry { peers, newly_present }
    }

    async fn exit_call(&self, call_id: &str, user_id: &str, conn: &ConnectionId) -> bool {
        let mut calls = self.calls.lock();
        let Some(users) = calls.get_mut(call_id) else {
            return false;
        };
        let Some(conns) = users.get_mut(user_id) else {
            return false;
        };
        if !conns.remove(conn) || !conns.is_empty() {
            return false;
        }
        users.remove(user_id);
        if users.is_empty() {
            calls.remove(call_id);
        }
        true
    }

    async fn call_participants(&self, call_id: &str) -> Vec<UserId> {
        let calls = self.calls.lock();
        let mut out: Vec<UserId> = calls
            .get(call_id)
            .map(|users| users.keys().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn attached(
        rooms: &LocalRooms,
        user: &str,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = ConnectionId::new();
        rooms.attach(&conn, user, tx).await;
        (conn, rx)
    }

    fn typing() -> ServerEvent {
        ServerEvent::UserTyping { conversation_id: Uuid::nil(), user_id: "u1".into(), is_typing: true }
    }

    #[test]
    fn room_keys_render_with_prefix() {
        let id = Uuid::nil();
        assert_eq!(RoomKey::Conversation(id).to_string(), format!("conversation:{id}"));
        assert_eq!(RoomKey::Call("abc".into()).to_string(), "call:abc");
    }

    #[tokio::test]
    async fn publish_respects_skip() {
        let rooms = LocalRooms::new();
        let room = RoomKey::Conversation(Uuid::new_v4());
        let (a, mut rx_a) = attached(&rooms, "u1").await;
        let (b, mut rx_b) = attached(&rooms, "u2").await;
        assert!(rooms.join(&room, &a).await);
        assert!(rooms.join(&room, &b).await);

        assert_eq!(rooms.publish(&room, typing(), Some(&a)).await, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());

        assert_eq!(rooms.publish(&room, typing(), None).await, 2);
    }

    #[tokio::test]
    async fn leave_is_idempotent() {
        let rooms = LocalRooms::new();
        let room = RoomKey::Conversation(Uuid::new_v4());
        let (a, _rx) = attached(&rooms, "u1").await;
        rooms.leave(&room, &a).await;
        rooms.join(&room, &a).await;
        rooms.leave(&room, &a).await;
        rooms.leave(&room, &a).await;
        assert!(!rooms.is_subscribed(&room, &a).await);
        assert_eq!(rooms.publish(&room, typing(), None).await, 0);
    }

    #[tokio::test]
    async fn join_requires_attached_connection() {
        let rooms = LocalRooms::new();
        let room = RoomKey::Call("c".into());
        assert!(!rooms.join(&room, &ConnectionId::new()).await);
    }

    #[tokio::test]
    async fn join_user_covers_all_devices() {
        let rooms = LocalRooms::new();
        let room = RoomKey::Conversation(Uuid::new_v4());
        let (a, _ra) = attached(&rooms, "u1").await;
        let (b, _rb) = attached(&rooms, "u1").await;
        assert_eq!(rooms.join_user(&room, "u1").await, 2);
        assert!(rooms.is_subscribed(&room, &a).await);
        assert!(rooms.is_subscribed(&room, &b).await);
        assert_eq!(rooms.join_user(&room, "offline").await, 0);
    }

    #[tokio::test]
    async fn call_presence_counts_connections() {
        let rooms = LocalRooms::new();
        let (phone, _r1) = attached(&rooms, "u1").await;
        let (laptop, _r2) = attached(&rooms, "u1").await;

        assert!(rooms.enter_call("c1", "u1", &phone).await.newly_present);
        let second = rooms.enter_call("c1", "u1", &laptop).await;
        assert!(!second.newly_present);
        assert!(second.peers.is_empty());

        assert!(!rooms.exit_call("c1", "u1", &phone).await);
        assert_eq!(rooms.call_participants("c1").await, vec!["u1".to_string()]);
        assert!(rooms.exit_call("c1", "u1", &laptop).await);
        assert!(rooms.call_participants("c1").await.is_empty());
    }

    #[tokio::test]
    async fn detach_releases_calls_and_rooms() {
        let rooms = LocalRooms::new();
        let (a, _ra) = attached(&rooms, "u1").await;
        let (b, _rb) = attached(&rooms, "u2").await;
        let call = RoomKey::Call("c1".into());
        rooms.enter_call("c1", "u1", &a).await;
        rooms.join(&call, &a).await;
        let entry = rooms.enter_call("c1", "u2", &b).await;
        assert_eq!(entry.peers, vec!["u1".to_string()]);

        let departures = rooms.detach(&a).await;
        assert_eq!(departures, vec![CallDeparture { call_id: "c1".into(), user_id: "u1".into() }]);
        assert!(!rooms.is_subscribed(&call, &a).await);
        assert_eq!(rooms.call_participants("c1").await, vec!["u2".to_string()]);

        rooms.detach(&b).await;
        // next join starts from an empty call
        let (c, _rc) = attached(&rooms, "u3").await;
        assert!(rooms.enter_call("c1", "u3", &c).await.peers.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn join_racing_detach_leaves_nothing_behind() {
        let rooms = std::sync::Arc::new(LocalRooms::new());
        for _ in 0..200 {
            let (conn, _rx) = attached(&rooms, "u1").await;
            let joiner = {
                let rooms = rooms.clone();
                tokio::spawn(async move {
                    for _ in 0..8 {
                        rooms.join_user(&RoomKey::Conversation(Uuid::new_v4()), "u1").await;
                    }
                })
            };
            let detacher = {
                let rooms = rooms.clone();
                let conn = conn.clone();
                tokio::spawn(async move { rooms.detach(&conn).await })
            };
            joiner.await.unwrap();
            detacher.await.unwrap();

            assert!(!rooms.joined.contains_key(&conn));
            assert!(rooms.subscribers.iter().all(|set| !set.contains(&conn)));
        }
        assert!(rooms.subscribers.is_empty());
    }
}
