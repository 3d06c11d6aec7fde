//! Conversation, membership and message persistence.
//!
//! The realtime core never infers membership on its own; every send and every
//! room join asks a [`ChatStore`].

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::util::id::{EventId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub event_id: Option<EventId>,
    pub title: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub conversation_id: Uuid,
    pub user_id: UserId,
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_read_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// `None` for system messages.
    pub sender_id: Option<UserId>,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Per-conversation position, assigned when the row is written.
    pub seq: u64,
}

/// Display data used to hydrate message senders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("conversation {0} not found")]
    ConversationNotFound(Uuid),
    #[error("event {0} already has a group chat")]
    DuplicateEventGroup(EventId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn conversation(&self, conversation_id: Uuid) -> StoreResult<Option<Conversation>>;

    async fn conversations_for_user(&self, user_id: &str) -> StoreResult<Vec<Conversation>>;

    async fn is_member(&self, conversation_id: Uuid, user_id: &str) -> StoreResult<bool>;

    /// Returns `true` when a new membership row was written, `false` when the
    /// user already belonged to the conversation.
    async fn add_member(&self, conversation_id: Uuid, user_id: &str) -> StoreResult<bool>;

    async fn members(&self, conversation_id: Uuid) -> StoreResult<Vec<Membership>>;

    async fn conversation_for_event(&self, event_id: &str) -> StoreResult<Option<Uuid>>;

    /// Event conversations are unique per event id; a second one for the same
    /// event fails with [`StoreError::DuplicateEventGroup`] and writes nothing.
    async fn create_conversation(
        &self,
        kind: ConversationKind,
        title: Option<String>,
        event_id: Option<EventId>,
    ) -> StoreResult<Conversation>;

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        sender_id: Option<&str>,
        kind: MessageKind,
        content: &str,
    ) -> StoreResult<Message>;

    /// Most recent `limit` messages, oldest first.
    async fn messages(&self, conversation_id: Uuid, limit: usize) -> StoreResult<Vec<Message>>;

    async fn profile(&self, user_id: &str) -> StoreResult<Option<UserProfile>>;
}
