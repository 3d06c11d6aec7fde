//! Websocket wire events.
//!
//! Every frame is a JSON text frame `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::store::{Message, UserProfile};
use crate::util::id::{EventId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    SendMessage { conversation_id: Uuid, content: String },
    JoinConversation(Uuid),
    LeaveConversation(Uuid),
    Typing { conversation_id: Uuid, is_typing: bool },
    CallInvite {
        call_id: String,
        to_user_id: UserId,
        #[serde(default)]
        conversation_id: Option<Uuid>,
        #[serde(default)]
        mode: CallMode,
    },
    CallJoin { call_id: String },
    CallLeave { call_id: String },
    WebrtcOffer { call_id: String, to_user_id: UserId, sdp: Value },
    WebrtcAnswer { call_id: String, to_user_id: UserId, sdp: Value },
    WebrtcIce { call_id: String, to_user_id: UserId, candidate: Value },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMode {
    Audio,
    #[default]
    Video,
}

/// A persisted message plus the sender's display data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender_name: Option<String>,
    pub sender_avatar: Option<String>,
}

impl MessageView {
    pub fn hydrate(message: Message, sender: Option<UserProfile>) -> Self {
        let (sender_name, sender_avatar) = match sender {
            Some(p) => (Some(p.display_name), p.avatar_url),
            None => (None, None),
        };
        Self { message, sender_name, sender_avatar }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    NewMessage(MessageView),
    UserTyping { conversation_id: Uuid, user_id: UserId, is_typing: bool },
    MemberJoined { conversation_id: Uuid, user_id: UserId, user_name: String },
    JoinedEventGroup { conversation_id: Uuid, event_id: EventId, title: Option<String> },
    CallInvite {
        call_id: String,
        from_user_id: UserId,
        conversation_id: Option<Uuid>,
        mode: CallMode,
    },
    CallParticipants { call_id: String, participants: Vec<UserId> },
    CallUserJoined { call_id: String, user_id: UserId },
    CallUserLeft { call_id: String, user_id: UserId },
    WebrtcOffer { call_id: String, from_user_id: UserId, sdp: Value },
    WebrtcAnswer { call_id: String, from_user_id: UserId, sdp: Value },
    WebrtcIce { call_id: String, from_user_id: UserId, candidate: Value },
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error { message: message.into() }
    }

    /// Wire name, used as a log field.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage(_) => "new_message",
            ServerEvent::UserTyping { .. } => "user_typing",
            ServerEvent::MemberJoined { .. } => "member_joined",
            ServerEvent::JoinedEventGroup { .. } => "joined_event_group",
            ServerEvent::CallInvite { .. } => "call_invite",
            ServerEvent::CallParticipants { .. } => "call_participants",
            ServerEvent::CallUserJoined { .. } => "call_user_joined",
            ServerEvent::CallUserLeft { .. } => "call_user_left",
            ServerEvent::WebrtcOffer { .. } => "webrtc_offer",
            ServerEvent::WebrtcAnswer { .. } => "webrtc_answer",
            ServerEvent::WebrtcIce { .. } => "webrtc_ice",
            ServerEvent::Error { .. } => "error",
        }
    }
}
