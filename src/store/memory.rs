use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    ChatStore, Conversation, ConversationKind, Membership, Message, MessageKind, StoreError,
    StoreResult, UserProfile,
};
use crate::util::id::{new_row_id, EventId, UserId};

#[derive(Default)]
struct Tables {
    conversations: HashMap<Uuid, Conversation>,
    // insertion order preserved per conversation
    members: HashMap<Uuid, Vec<Membership>>,
    messages: HashMap<Uuid, Vec<Message>>,
    profiles: HashMap<UserId, UserProfile>,
}

/// Process-local [`ChatStore`]. One lock guards all tables so a membership
/// check and the write that follows it observe the same state.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_profile(&self, user_id: &str, profile: UserProfile) {
        self.tables.lock().profiles.insert(user_id.to_owned(), profile);
    }
}

fn find_event_conversation(tables: &Tables, event_id: &str) -> Option<Uuid> {
    tables
        .conversations
        .values()
        .find(|c| c.kind == ConversationKind::Event && c.event_id.as_deref() == Some(event_id))
        .map(|c| c.id)
}

#[async_trait]
impl ChatStore for InMemoryStore {
    async fn conversation(&self, conversation_id: Uuid) -> StoreResult<Option<Conversation>> {
        Ok(self.tables.lock().conversations.get(&conversation_id).cloned())
    }

    async fn conversations_for_user(&self, user_id: &str) -> StoreResult<Vec<Conversation>> {
        let tables = self.tables.lock();
        let mut out: Vec<Conversation> = tables
            .members
            .iter()
            .filter(|(_, rows)| rows.iter().any(|m| m.user_id == user_id))
            .filter_map(|(id, _)| tables.conversations.get(id).cloned())
            .collect();
        out.sort_by_key(|c| c.created_at);
        Ok(out)
    }

    async fn is_member(&self, conversation_id: Uuid, user_id: &str) -> StoreResult<bool> {
        let tables = self.tables.lock();
        Ok(tables
            .members
            .get(&conversation_id)
            .is_some_and(|rows| rows.iter().any(|m| m.user_id == user_id)))
    }

    async fn add_member(&self, conversation_id: Uuid, user_id: &str) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        if !tables.conversations.contains_key(&conversation_id) {
            return Err(StoreError::ConversationNotFound(conversation_id));
        }
        let rows = tables.members.entry(conversation_id).or_default();
        if rows.iter().any(|m| m.user_id == user_id) {
            return Ok(false);
        }
        let now = OffsetDateTime::now_utc();
        rows.push(Membership {
            conversation_id,
            user_id: user_id.to_owned(),
            joined_at: now,
            last_read_at: now,
        });
        Ok(true)
    }

    async fn members(&self, conversation_id: Uuid) -> StoreResult<Vec<Membership>> {
        let tables = self.tables.lock();
        if !tables.conversations.contains_key(&conversation_id) {
            return Err(StoreError::ConversationNotFound(conversation_id));
        }
        Ok(tables.members.get(&conversation_id).cloned().unwrap_or_default())
    }

    async fn conversation_for_event(&self, event_id: &str) -> StoreResult<Option<Uuid>> {
        Ok(find_event_conversation(&self.tables.lock(), event_id))
    }

    async fn create_conversation(
        &self,
        kind: ConversationKind,
        title: Option<String>,
        event_id: Option<EventId>,
    ) -> StoreResult<Conversation> {
        let mut tables = self.tables.lock();
        if let (ConversationKind::Event, Some(event)) = (kind, event_id.as_deref()) {
            if find_event_conversation(&tables, event).is_some() {
                return Err(StoreError::DuplicateEventGroup(event.to_owned()));
            }
        }
        let conversation = Conversation {
            id: new_row_id(),
            kind,
            event_id,
            title,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.conversations.insert(conversation.id, conversation.clone());
        tables.members.insert(conversation.id, Vec::new());
        Ok(conversation)
    }

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        sender_id: Option<&str>,
        kind: MessageKind,
        content: &str,
    ) -> StoreResult<Message> {
        let mut tables = self.tables.lock();
        if !tables.conversations.contains_key(&conversation_id) {
            return Err(StoreError::ConversationNotFound(conversation_id));
        }
        let rows = tables.messages.entry(conversation_id).or_default();
        let seq = rows.last().map_or(1, |m| m.seq + 1);
        let message = Message {
            id: new_row_id(),
            conversation_id,
            sender_id: sender_id.map(str::to_owned),
            content: content.to_owned(),
            kind,
            created_at: OffsetDateTime::now_utc(),
            seq,
        };
        rows.push(message.clone());
        Ok(message)
    }

    async fn messages(&self, conversation_id: Uuid, limit: usize) -> StoreResult<Vec<Message>> {
        let tables = self.tables.lock();
        if !tables.conversations.contains_key(&conversation_id) {
            return Err(StoreError::ConversationNotFound(conversation_id));
        }
        let rows = tables.messages.get(&conversation_id).map(Vec::as_slice).unwrap_or_default();
        let start = rows.len().saturating_sub(limit);
        Ok(rows[start..].to_vec())
    }

    async fn profile(&self, user_id: &str) -> StoreResult<Option<UserProfile>> {
        Ok(self.tables.lock().profiles.get(user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_member_is_idempotent() {
        let store = InMemoryStore::new();
        let conv = store
            .create_conversation(ConversationKind::Event, Some("Gala".into()), Some("ev1".into()))
            .await
            .unwrap();

        assert!(store.add_member(conv.id, "u1").await.unwrap());
        assert!(!store.add_member(conv.id, "u1").await.unwrap());
        assert_eq!(store.members(conv.id).await.unwrap().len(), 1);
        assert!(store.is_member(conv.id, "u1").await.unwrap());
        assert!(!store.is_member(conv.id, "u2").await.unwrap());
    }

    #[tokio::test]
    async fn add_member_to_unknown_conversation_fails() {
        let store = InMemoryStore::new();
        let err = store.add_member(Uuid::new_v4(), "u1").await.unwrap_err();
        assert!(matches!(err, StoreError::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn messages_get_increasing_seq() {
        let store = InMemoryStore::new();
        let conv = store.create_conversation(ConversationKind::Direct, None, None).await.unwrap();
        for text in ["a", "b", "c"] {
            store.insert_message(conv.id, Some("u1"), MessageKind::Text, text).await.unwrap();
        }

        let history = store.messages(conv.id, 2).await.unwrap();
        let seqs: Vec<u64> = history.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![2, 3]);
        assert_eq!(history[1].content, "c");
    }

    #[tokio::test]
    async fn finds_event_conversation() {
        let store = InMemoryStore::new();
        let conv = store
            .create_conversation(ConversationKind::Event, None, Some("ev9".into()))
            .await
            .unwrap();
        store.add_member(conv.id, "org").await.unwrap();

        assert_eq!(store.conversation_for_event("ev9").await.unwrap(), Some(conv.id));
        assert_eq!(store.conversation_for_event("other").await.unwrap(), None);
        let listed = store.conversations_for_user("org").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, conv.id);
    }

    #[tokio::test]
    async fn second_event_conversation_is_rejected() {
        let store = InMemoryStore::new();
        let first = store
            .create_conversation(ConversationKind::Event, Some("Gala".into()), Some("ev1".into()))
            .await
            .unwrap();

        let err = store
            .create_conversation(ConversationKind::Event, Some("Gala".into()), Some("ev1".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEventGroup(ref e) if e == "ev1"));
        assert_eq!(store.conversation_for_event("ev1").await.unwrap(), Some(first.id));

        // other events and direct chats are unaffected
        store.create_conversation(ConversationKind::Event, None, Some("ev2".into())).await.unwrap();
        store.create_conversation(ConversationKind::Direct, None, None).await.unwrap();
        store.create_conversation(ConversationKind::Direct, None, None).await.unwrap();
    }
}
