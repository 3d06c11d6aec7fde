//! Event group chats: created with the event, grown as applications are
//! accepted.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::protocol::{MessageView, ServerEvent};
use crate::push::{PushNotification, PushQueue};
use crate::room::{RoomDirectory, RoomKey};
use crate::store::{ChatStore, ConversationKind, MessageKind, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum GroupError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of adding an accepted worker to an event's group chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerAdded {
    Joined(Uuid),
    AlreadyMember(Uuid),
    /// The event never got a group chat. Not fatal to the acceptance.
    NoGroup,
}

#[derive(Clone)]
pub struct EventGroups {
    store: Arc<dyn ChatStore>,
    rooms: Arc<dyn RoomDirectory>,
    push: PushQueue,
}

impl EventGroups {
    pub fn new(store: Arc<dyn ChatStore>, rooms: Arc<dyn RoomDirectory>, push: PushQueue) -> Self {
        Self { store, rooms, push }
    }

    /// Create the group chat for a newly published event with the organizer
    /// as its only member.
    ///
    /// Fails with [`StoreError::DuplicateEventGroup`] if the event already has
    /// one.
    pub async fn create_event_group(
        &self,
        event_id: &str,
        event_title: &str,
        organizer_id: &str,
    ) -> Result<Uuid, GroupError> {
        let conversation = self
            .store
            .create_conversation(
                ConversationKind::Event,
                Some(event_title.to_owned()),
                Some(event_id.to_owned()),
            )
            .await?;
        self.store.add_member(conversation.id, organizer_id).await?;
        self.store
            .insert_message(
                conversation.id,
                None,
                MessageKind::System,
                &format!("Team chat for \"{event_title}\" created"),
            )
            .await?;

        // Route the new room to the organizer's open sessions right away.
        self.rooms.join_user(&RoomKey::Conversation(conversation.id), organizer_id).await;
        tracing::info!(event_id, conversation_id = %conversation.id, organizer_id, "event group created");
        Ok(conversation.id)
    }

    pub async fn add_worker_to_event_group(
        &self,
        event_id: &str,
        worker_id: &str,
        worker_name: &str,
    ) -> Result<WorkerAdded, GroupError> {
        let Some(conversation_id) = self.store.conversation_for_event(event_id).await? else {
            tracing::warn!(event_id, worker_id, "event has no group chat, skipping");
            return Ok(WorkerAdded::NoGroup);
        };
        if !self.store.add_member(conversation_id, worker_id).await? {
            return Ok(WorkerAdded::AlreadyMember(conversation_id));
        }

        let notice = self
            .store
            .insert_message(
                conversation_id,
                None,
                MessageKind::System,
                &format!("{worker_name} has joined the team"),
            )
            .await?;

        let room = RoomKey::Conversation(conversation_id);
        let worker_conns = self.rooms.join_user(&room, worker_id).await;

        let title = self.store.conversation(conversation_id).await?.and_then(|c| c.title);
        self.rooms
            .send_to_user(
                worker_id,
                ServerEvent::JoinedEventGroup {
                    conversation_id,
                    event_id: event_id.to_owned(),
                    title: title.clone(),
                },
            )
            .await;
        self.rooms
            .publish(
                &room,
                ServerEvent::MemberJoined {
                    conversation_id,
                    user_id: worker_id.to_owned(),
                    user_name: worker_name.to_owned(),
                },
                None,
            )
            .await;
        self.rooms
            .publish(&room, ServerEvent::NewMessage(MessageView::hydrate(notice, None)), None)
            .await;

        self.push.enqueue(PushNotification {
            user_id: worker_id.to_owned(),
            title: "You're on the team".to_owned(),
            body: match &title {
                Some(t) => format!("You've been added to the team chat for {t}"),
                None => "You've been added to a team chat".to_owned(),
            },
            data: json!({
                "type": "joined_event_group",
                "conversationId": conversation_id,
                "eventId": event_id,
            }),
        });

        tracing::info!(event_id, %conversation_id, worker_id, worker_conns, "worker joined event group");
        Ok(WorkerAdded::Joined(conversation_id))
    }
}
