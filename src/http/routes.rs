//! HTTP routes: health, conversation history, event-group triggers.

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::auth::{AuthError, Identity, Role, TokenAuthority};
use crate::groups::{GroupError, WorkerAdded};
use crate::hub::Hub;
use crate::store::{Conversation, Message, StoreError};
use crate::ws::connection::bearer;

const DEFAULT_HISTORY: usize = 50;
const MAX_HISTORY: usize = 200;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub tokens: TokenAuthority,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Unauthorized(#[from] AuthError),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    BadRequest(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<GroupError> for ApiError {
    fn from(err: GroupError) -> Self {
        match err {
            GroupError::Store(e) => ApiError::Store(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) | ApiError::Store(StoreError::ConversationNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::DuplicateEventGroup(_)) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(e) => {
                tracing::error!(error = %e, "store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Caller identity from `Authorization: Bearer`.
pub struct AuthUser(pub Identity);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer(&parts.headers).unwrap_or_default();
        Ok(AuthUser(state.tokens.verify(&token)?))
    }
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    Ok(Json(state.hub.store().conversations_for_user(&me.user_id).await?))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

pub async fn history(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(conversation_id): Path<Uuid>,
    Query(HistoryQuery { limit }): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let store = state.hub.store();
    if !store.is_member(conversation_id, &me.user_id).await? {
        return Err(ApiError::Forbidden("not a member of this conversation"));
    }
    let limit = limit.unwrap_or(DEFAULT_HISTORY).clamp(1, MAX_HISTORY);
    Ok(Json(store.messages(conversation_id, limit).await?))
}

#[derive(Deserialize)]
pub struct CreateGroupRequest {
    pub title: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupResponse {
    pub conversation_id: Uuid,
}

/// Called when an organizer publishes an event. A second call for the same
/// event is a conflict; the store rejects it atomically.
pub async fn create_group(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(event_id): Path<String>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<GroupResponse>), ApiError> {
    if me.role != Role::Organizer {
        return Err(ApiError::Forbidden("only organizers create event groups"));
    }
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title is required"));
    }
    let conversation_id = state
        .hub
        .groups
        .create_event_group(&event_id, req.title.trim(), &me.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(GroupResponse { conversation_id })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub worker_id: String,
    pub worker_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberResponse {
    pub conversation_id: Option<Uuid>,
    pub added: bool,
}

/// Called when an organizer accepts a worker's application.
pub async fn add_member(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(event_id): Path<String>,
    Json(req): Json<AddMemberRequest>,
) -> Result<Json<AddMemberResponse>, ApiError> {
    if me.role != Role::Organizer {
        return Err(ApiError::Forbidden("only organizers accept applications"));
    }
    if req.worker_id.trim().is_empty() {
        return Err(ApiError::BadRequest("workerId is required"));
    }
    let store = state.hub.store();
    if let Some(conversation_id) = store.conversation_for_event(&event_id).await? {
        if !store.is_member(conversation_id, &me.user_id).await? {
            return Err(ApiError::Forbidden("not an organizer of this event"));
        }
    }

    let name = match req.worker_name.trim() {
        "" => req.worker_id.trim(),
        name => name,
    };
    let outcome = state
        .hub
        .groups
        .add_worker_to_event_group(&event_id, req.worker_id.trim(), name)
        .await?;
    let response = match outcome {
        WorkerAdded::Joined(id) => AddMemberResponse { conversation_id: Some(id), added: true },
        WorkerAdded::AlreadyMember(id) => AddMemberResponse { conversation_id: Some(id), added: false },
        WorkerAdded::NoGroup => AddMemberResponse { conversation_id: None, added: false },
    };
    Ok(Json(response))
}
