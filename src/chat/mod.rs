//! Chat messages, typing indicators and conversation room membership.

use std::sync::Arc;

use uuid::Uuid;

use crate::hub::Connection;
use crate::protocol::{MessageView, ServerEvent};
use crate::room::{RoomDirectory, RoomKey};
use crate::store::{ChatStore, MessageKind, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum ChatError {
    #[error("not a member of conversation {0}")]
    NotMember(Uuid),
    #[error("could not reach message store")]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn ChatStore>,
    rooms: Arc<dyn RoomDirectory>,
}

impl ChatService {
    pub fn new(store: Arc<dyn ChatStore>, rooms: Arc<dyn RoomDirectory>) -> Self {
        Self { store, rooms }
    }

    /// Persist a text message and publish it to the conversation room,
    /// including the sender's own connections.
    ///
    /// Blank content is ignored and yields `Ok(None)`.
    pub async fn send_message(
        &self,
        conn: &Connection,
        conversation_id: Uuid,
        content: &str,
    ) -> Result<Option<MessageView>, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }
        let sender = conn.identity.user_id.as_str();
        if !self.store.is_member(conversation_id, sender).await? {
            return Err(ChatError::NotMember(conversation_id));
        }

        let message = self
            .store
            .insert_message(conversation_id, Some(sender), MessageKind::Text, content)
            .await?;
        // A missing profile only loses display data, the message is already stored.
        let profile = match self.store.profile(sender).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(user_id = sender, error = %e, "sender profile lookup failed");
                None
            }
        };
        let view = MessageView::hydrate(message, profile);

        let room = RoomKey::Conversation(conversation_id);
        let delivered = self.rooms.publish(&room, ServerEvent::NewMessage(view.clone()), None).await;
        tracing::debug!(%room, seq = view.message.seq, delivered, "message sent");
        Ok(Some(view))
    }

    /// Relay a typing indicator to everyone else in the room. Connections not
    /// subscribed to the room are ignored.
    pub async fn typing(&self, conn: &Connection, conversation_id: Uuid, is_typing: bool) {
        let room = RoomKey::Conversation(conversation_id);
        if !self.rooms.is_subscribed(&room, &conn.id).await {
            return;
        }
        let event = ServerEvent::UserTyping {
            conversation_id,
            user_id: conn.identity.user_id.clone(),
            is_typing,
        };
        self.rooms.publish(&room, event, Some(&conn.id)).await;
    }

    pub async fn join_conversation(&self, conn: &Connection, conversation_id: Uuid) -> Result<(), ChatError> {
        if !self.store.is_member(conversation_id, &conn.identity.user_id).await? {
            return Err(ChatError::NotMember(conversation_id));
        }
        self.rooms.join(&RoomKey::Conversation(conversation_id), &conn.id).await;
        Ok(())
    }

    pub async fn leave_conversation(&self, conn: &Connection, conversation_id: Uuid) {
        self.rooms.leave(&RoomKey::Conversation(conversation_id), &conn.id).await;
    }

    /// Subscribe a fresh connection to every conversation its user belongs to.
    pub async fn subscribe_all(&self, conn: &Connection) -> Result<usize, ChatError> {
        let conversations = self.store.conversations_for_user(&conn.identity.user_id).await?;
        let mut joined = 0;
        for c in &conversations {
            if self.rooms.join(&RoomKey::Conversation(c.id), &conn.id).await {
                joined += 1;
            }
        }
        Ok(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Identity, Role};
    use crate::room::LocalRooms;
    use crate::store::{ConversationKind, InMemoryStore, UserProfile};
    use crate::util::id::ConnectionId;
    use tokio::sync::mpsc;

    struct Fixture {
        store: Arc<InMemoryStore>,
        rooms: Arc<LocalRooms>,
        chat: ChatService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let rooms = Arc::new(LocalRooms::new());
        let chat = ChatService::new(store.clone(), rooms.clone());
        Fixture { store, rooms, chat }
    }

    async fn connect(f: &Fixture, user: &str) -> (Connection, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection {
            id: ConnectionId::new(),
            identity: Identity { user_id: user.into(), role: Role::Worker },
        };
        f.rooms.attach(&conn.id, user, tx).await;
        (conn, rx)
    }

    #[tokio::test]
    async fn message_reaches_all_of_senders_devices() {
        let f = fixture();
        let conv = f.store.create_conversation(ConversationKind::Direct, None, None).await.unwrap();
        f.store.add_member(conv.id, "u1").await.unwrap();
        f.store.upsert_profile("u1", UserProfile { display_name: "Ada".into(), avatar_url: None });

        let (phone, mut rx_phone) = connect(&f, "u1").await;
        let (laptop, mut rx_laptop) = connect(&f, "u1").await;
        f.chat.subscribe_all(&phone).await.unwrap();
        f.chat.subscribe_all(&laptop).await.unwrap();

        let sent = f.chat.send_message(&phone, conv.id, " hello ").await.unwrap().unwrap();
        assert_eq!(sent.message.content, "hello");
        assert_eq!(sent.sender_name.as_deref(), Some("Ada"));

        for rx in [&mut rx_phone, &mut rx_laptop] {
            match rx.try_recv().unwrap() {
                ServerEvent::NewMessage(view) => assert_eq!(view.message.id, sent.message.id),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn non_member_cannot_send() {
        let f = fixture();
        let conv = f.store.create_conversation(ConversationKind::Direct, None, None).await.unwrap();
        let (outsider, _rx) = connect(&f, "intruder").await;

        let err = f.chat.send_message(&outsider, conv.id, "hi").await.unwrap_err();
        assert!(matches!(err, ChatError::NotMember(id) if id == conv.id));
        assert!(f.store.messages(conv.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_message_is_ignored() {
        let f = fixture();
        let conv = f.store.create_conversation(ConversationKind::Direct, None, None).await.unwrap();
        f.store.add_member(conv.id, "u1").await.unwrap();
        let (conn, _rx) = connect(&f, "u1").await;

        assert!(f.chat.send_message(&conn, conv.id, "   ").await.unwrap().is_none());
        assert!(f.store.messages(conv.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn typing_skips_sender() {
        let f = fixture();
        let conv = f.store.create_conversation(ConversationKind::Direct, None, None).await.unwrap();
        f.store.add_member(conv.id, "u1").await.unwrap();
        f.store.add_member(conv.id, "u2").await.unwrap();
        let (a, mut rx_a) = connect(&f, "u1").await;
        let (b, mut rx_b) = connect(&f, "u2").await;
        f.chat.join_conversation(&a, conv.id).await.unwrap();
        f.chat.join_conversation(&b, conv.id).await.unwrap();

        f.chat.typing(&a, conv.id, true).await;
        assert!(rx_a.try_recv().is_err());
        assert_eq!(
            rx_b.try_recv().unwrap(),
            ServerEvent::UserTyping { conversation_id: conv.id, user_id: "u1".into(), is_typing: true }
        );
    }

    #[tokio::test]
    async fn join_checks_membership() {
        let f = fixture();
        let conv = f.store.create_conversation(ConversationKind::Direct, None, None).await.unwrap();
        let (conn, _rx) = connect(&f, "u1").await;

        assert!(matches!(
            f.chat.join_conversation(&conn, conv.id).await,
            Err(ChatError::NotMember(_))
        ));
        assert!(!f.rooms.is_subscribed(&RoomKey::Conversation(conv.id), &conn.id).await);
    }
}
