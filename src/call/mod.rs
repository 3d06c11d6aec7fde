//! WebRTC call signaling.
//!
//! The server tracks who is in which call and relays offers, answers and ICE
//! candidates between named users. Payloads are opaque; media never touches
//! the server. Mesh construction is left to clients: a newcomer receives the
//! participant list and offers to each existing peer.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::hub::Connection;
use crate::protocol::{CallMode, ServerEvent};
use crate::room::{CallDeparture, RoomDirectory, RoomKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    Ice,
}

#[derive(Clone)]
pub struct CallService {
    rooms: Arc<dyn RoomDirectory>,
}

impl CallService {
    pub fn new(rooms: Arc<dyn RoomDirectory>) -> Self {
        Self { rooms }
    }

    /// Ring every connection of `to_user_id`. Call state is untouched.
    pub async fn invite(
        &self,
        conn: &Connection,
        call_id: &str,
        to_user_id: &str,
        conversation_id: Option<Uuid>,
        mode: CallMode,
    ) -> usize {
        let event = ServerEvent::CallInvite {
            call_id: call_id.to_owned(),
            from_user_id: conn.identity.user_id.clone(),
            conversation_id,
            mode,
        };
        let rung = self.rooms.send_to_user(to_user_id, event).await;
        tracing::debug!(call_id, from = %conn.identity.user_id, to = to_user_id, rung, "call invite");
        rung
    }

    /// Enter the call, reply with the other participants and announce the
    /// newcomer to the rest of the call room.
    pub async fn join(&self, conn: &Connection, call_id: &str) {
        let user_id = &conn.identity.user_id;
        let entry = self.rooms.enter_call(call_id, user_id, &conn.id).await;
        let room = RoomKey::Call(call_id.to_owned());
        self.rooms.join(&room, &conn.id).await;

        self.rooms
            .send_to_connection(
                &conn.id,
                ServerEvent::CallParticipants { call_id: call_id.to_owned(), participants: entry.peers },
            )
            .await;
        if entry.newly_present {
            self.rooms
                .publish(
                    &room,
                    ServerEvent::CallUserJoined { call_id: call_id.to_owned(), user_id: user_id.clone() },
                    Some(&conn.id),
                )
                .await;
        }
        tracing::debug!(call_id, user_id = %user_id, conn_id = %conn.id, "joined call");
    }

    pub async fn leave(&self, conn: &Connection, call_id: &str) {
        let user_id = &conn.identity.user_id;
        let room = RoomKey::Call(call_id.to_owned());
        self.rooms.leave(&room, &conn.id).await;
        if self.rooms.exit_call(call_id, user_id, &conn.id).await {
            self.announce_left(call_id, user_id).await;
        }
    }

    /// Forward a signaling payload to every connection of `to_user_id`,
    /// tagged with the sender and call id.
    pub async fn relay(&self, conn: &Connection, kind: SignalKind, call_id: &str, to_user_id: &str, payload: Value) {
        let call_id = call_id.to_owned();
        let from_user_id = conn.identity.user_id.clone();
        let event = match kind {
            SignalKind::Offer => ServerEvent::WebrtcOffer { call_id, from_user_id, sdp: payload },
            SignalKind::Answer => ServerEvent::WebrtcAnswer { call_id, from_user_id, sdp: payload },
            SignalKind::Ice => ServerEvent::WebrtcIce { call_id, from_user_id, candidate: payload },
        };
        if self.rooms.send_to_user(to_user_id, event).await == 0 {
            tracing::debug!(?kind, to = to_user_id, "signal target not connected");
        }
    }

    /// Announce identities that lost their last connection when a socket closed.
    pub async fn disconnected(&self, departures: Vec<CallDeparture>) {
        for CallDeparture { call_id, user_id } in departures {
            self.announce_left(&call_id, &user_id).await;
        }
    }

    async fn announce_left(&self, call_id: &str, user_id: &str) {
        let room = RoomKey::Call(call_id.to_owned());
        self.rooms
            .publish(
                &room,
                ServerEvent::CallUserLeft { call_id: call_id.to_owned(), user_id: user_id.to_owned() },
                None,
            )
            .await;
        tracing::debug!(call_id, user_id, "left call");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Identity, Role};
    use crate::room::LocalRooms;
    use crate::util::id::ConnectionId;
    use serde_json::json;
    use tokio::sync::mpsc;

    async fn connect(
        rooms: &LocalRooms,
        user: &str,
    ) -> (Connection, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection {
            id: ConnectionId::new(),
            identity: Identity { user_id: user.into(), role: Role::Worker },
        };
        rooms.attach(&conn.id, user, tx).await;
        (conn, rx)
    }

    fn participants(call: &str, users: &[&str]) -> ServerEvent {
        ServerEvent::CallParticipants {
            call_id: call.into(),
            participants: users.iter().map(|u| u.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn leave_of_last_participant_forgets_call() {
        let rooms = Arc::new(LocalRooms::new());
        let calls = CallService::new(rooms.clone());
        let (a, mut rx_a) = connect(&rooms, "a").await;
        let (b, mut rx_b) = connect(&rooms, "b").await;

        calls.join(&a, "c1").await;
        calls.join(&b, "c1").await;
        calls.leave(&b, "c1").await;
        assert_eq!(rx_a.try_recv().unwrap(), participants("c1", &[]));
        assert!(matches!(rx_a.try_recv().unwrap(), ServerEvent::CallUserJoined { .. }));
        assert_eq!(
            rx_a.try_recv().unwrap(),
            ServerEvent::CallUserLeft { call_id: "c1".into(), user_id: "b".into() }
        );

        calls.leave(&a, "c1").await;
        assert!(rooms.call_participants("c1").await.is_empty());

        calls.join(&b, "c1").await;
        assert_eq!(rx_b.try_recv().unwrap(), participants("c1", &["a"]));
        assert_eq!(rx_b.try_recv().unwrap(), participants("c1", &[]));
    }

    #[tokio::test]
    async fn second_device_keeps_user_in_call() {
        let rooms = Arc::new(LocalRooms::new());
        let calls = CallService::new(rooms.clone());
        let (phone, _r1) = connect(&rooms, "a").await;
        let (laptop, _r2) = connect(&rooms, "a").await;
        let (peer, mut rx_peer) = connect(&rooms, "b").await;

        calls.join(&phone, "c1").await;
        calls.join(&laptop, "c1").await;
        calls.join(&peer, "c1").await;
        assert_eq!(rx_peer.try_recv().unwrap(), participants("c1", &["a"]));

        let departures = rooms.detach(&phone.id).await;
        calls.disconnected(departures).await;
        assert!(rx_peer.try_recv().is_err());
        assert_eq!(rooms.call_participants("c1").await, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn relays_signals_verbatim() {
        let rooms = Arc::new(LocalRooms::new());
        let calls = CallService::new(rooms.clone());
        let (a, _ra) = connect(&rooms, "a").await;
        let (_b, mut rx_b) = connect(&rooms, "b").await;

        let sdp = json!({ "type": "offer", "sdp": "v=0..." });
        calls.relay(&a, SignalKind::Offer, "c1", "b", sdp.clone()).await;
        calls.relay(&a, SignalKind::Ice, "c1", "b", json!({ "candidate": "x" })).await;

        assert_eq!(
            rx_b.try_recv().unwrap(),
            ServerEvent::WebrtcOffer { call_id: "c1".into(), from_user_id: "a".into(), sdp }
        );
        assert!(matches!(rx_b.try_recv().unwrap(), ServerEvent::WebrtcIce { .. }));
    }

    #[tokio::test]
    async fn invite_goes_to_target_only() {
        let rooms = Arc::new(LocalRooms::new());
        let calls = CallService::new(rooms.clone());
        let (a, mut rx_a) = connect(&rooms, "a").await;
        let (_b, mut rx_b) = connect(&rooms, "b").await;

        assert_eq!(calls.invite(&a, "c1", "b", None, CallMode::Audio).await, 1);
        assert!(matches!(rx_b.try_recv().unwrap(), ServerEvent::CallInvite { mode: CallMode::Audio, .. }));
        assert!(rx_a.try_recv().is_err());
        assert!(rooms.call_participants("c1").await.is_empty());
    }
}
