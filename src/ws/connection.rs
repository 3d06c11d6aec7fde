//! WebSocket connection lifecycle management.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::auth::Identity;
use crate::hub::Hub;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::AppState;

#[derive(Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Authenticate before upgrading; a bad credential never opens the socket.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(WsParams { token }): Query<WsParams>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let credential = token.or_else(|| bearer(&headers)).unwrap_or_default();
    let identity = match state.tokens.verify(&credential) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::debug!(error = %e, "handshake rejected");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "unauthorized", "reason": e.to_string() })),
            )
                .into_response();
        }
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub, identity))
}

/// `Authorization: Bearer <token>`, if present.
pub(crate) fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_owned())
}

async fn handle_socket(socket: WebSocket, hub: Hub, identity: Identity) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    // channel for server -> client events
    let (sv_tx, mut sv_rx) = mpsc::unbounded_channel::<ServerEvent>();

    let conn = hub.connect(identity, sv_tx).await;
    let conn_id = conn.id.clone();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = sv_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(conn_id = %conn_id, event = event.name(), error = %e, "failed to serialize event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Events from one socket are handled in order, so a client's consecutive
    // sends are stored and published in the order they were written.
    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(txt))) => match serde_json::from_str::<ClientEvent>(&txt) {
                        Ok(event) => hub.handle(&conn, event).await,
                        Err(e) => tracing::debug!(conn_id = %conn.id, error = %e, "ignoring malformed event"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(conn_id = %conn.id, error = %e, "websocket error");
                        break;
                    }
                }
            }
            _ = &mut send_task => break,
        }
    }

    hub.disconnect(&conn).await;
    send_task.abort();
}
