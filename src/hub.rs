//! Per-connection dispatch of client events to the chat and call handlers.

use std::sync::Arc;

use crate::auth::Identity;
use crate::call::{CallService, SignalKind};
use crate::chat::ChatService;
use crate::groups::EventGroups;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::push::PushQueue;
use crate::room::{Outbox, RoomDirectory};
use crate::store::ChatStore;
use crate::util::id::ConnectionId;

/// One authenticated socket. The identity never changes after the handshake.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub identity: Identity,
}

#[derive(Clone)]
pub struct Hub {
    pub chat: ChatService,
    pub calls: CallService,
    pub groups: EventGroups,
    store: Arc<dyn ChatStore>,
    rooms: Arc<dyn RoomDirectory>,
}

impl Hub {
    pub fn new(store: Arc<dyn ChatStore>, rooms: Arc<dyn RoomDirectory>, push: PushQueue) -> Self {
        Self {
            chat: ChatService::new(store.clone(), rooms.clone()),
            calls: CallService::new(rooms.clone()),
            groups: EventGroups::new(store.clone(), rooms.clone(), push),
            store,
            rooms,
        }
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    /// Register a connection and subscribe it to all of its user's
    /// conversations.
    pub async fn connect(&self, identity: Identity, outbox: Outbox) -> Connection {
        let conn = Connection { id: ConnectionId::new(), identity };
        self.rooms.attach(&conn.id, &conn.identity.user_id, outbox).await;
        match self.chat.subscribe_all(&conn).await {
            Ok(rooms) => tracing::info!(conn_id = %conn.id, user_id = %conn.identity.user_id, rooms, "connected"),
            Err(e) => {
                // The socket stays usable; the client can still join rooms explicitly.
                tracing::warn!(conn_id = %conn.id, error = %e, "could not load conversations");
                self.reply(&conn, ServerEvent::error(e.to_string())).await;
            }
        }
        conn
    }

    pub async fn disconnect(&self, conn: &Connection) {
        let departures = self.rooms.detach(&conn.id).await;
        self.calls.disconnected(departures).await;
        tracing::info!(conn_id = %conn.id, user_id = %conn.identity.user_id, "disconnected");
    }

    /// Handle one client event. Failures are reported to this connection only.
    pub async fn handle(&self, conn: &Connection, event: ClientEvent) {
        match event {
            ClientEvent::SendMessage { conversation_id, content } => {
                if let Err(e) = self.chat.send_message(conn, conversation_id, &content).await {
                    tracing::debug!(conn_id = %conn.id, %conversation_id, error = %e, "send_message rejected");
                    self.reply(conn, ServerEvent::error(e.to_string())).await;
                }
            }
            ClientEvent::JoinConversation(conversation_id) => {
                if let Err(e) = self.chat.join_conversation(conn, conversation_id).await {
                    self.reply(conn, ServerEvent::error(e.to_string())).await;
                }
            }
            ClientEvent::LeaveConversation(conversation_id) => {
                self.chat.leave_conversation(conn, conversation_id).await;
            }
            ClientEvent::Typing { conversation_id, is_typing } => {
                self.chat.typing(conn, conversation_id, is_typing).await;
            }
            ClientEvent::CallInvite { call_id, to_user_id, conversation_id, mode } => {
                if blank(&[call_id.as_str(), to_user_id.as_str()]) {
                    return;
                }
                self.calls.invite(conn, &call_id, &to_user_id, conversation_id, mode).await;
            }
            ClientEvent::CallJoin { call_id } => {
                if !blank(&[call_id.as_str()]) {
                    self.calls.join(conn, &call_id).await;
                }
            }
            ClientEvent::CallLeave { call_id } => {
                if !blank(&[call_id.as_str()]) {
                    self.calls.leave(conn, &call_id).await;
                }
            }
            ClientEvent::WebrtcOffer { call_id, to_user_id, sdp } => {
                self.signal(conn, SignalKind::Offer, &call_id, &to_user_id, sdp).await;
            }
            ClientEvent::WebrtcAnswer { call_id, to_user_id, sdp } => {
                self.signal(conn, SignalKind::Answer, &call_id, &to_user_id, sdp).await;
            }
            ClientEvent::WebrtcIce { call_id, to_user_id, candidate } => {
                self.signal(conn, SignalKind::Ice, &call_id, &to_user_id, candidate).await;
            }
        }
    }

    async fn signal(
        &self,
        conn: &Connection,
        kind: SignalKind,
        call_id: &str,
        to_user_id: &str,
        payload: serde_json::Value,
    ) {
        if blank(&[call_id, to_user_id]) || payload.is_null() {
            return;
        }
        self.calls.relay(conn, kind, call_id, to_user_id, payload).await;
    }

    async fn reply(&self, conn: &Connection, event: ServerEvent) {
        self.rooms.send_to_connection(&conn.id, event).await;
    }
}

fn blank(fields: &[&str]) -> bool {
    fields.iter().any(|f| f.trim().is_empty())
}
