//! Realtime chat rooms and call signaling for the gig marketplace.

pub mod auth;
pub mod call;
pub mod chat;
pub mod config;
pub mod groups;
pub mod http;
pub mod hub;
pub mod protocol;
pub mod push;
pub mod room;
pub mod store;
pub mod telemetry;
pub mod util;
pub mod ws;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use crate::http::routes::AppState;

/// Build the full router: websocket endpoint plus the HTTP API.
pub fn app(state: AppState, allowed_origin: Option<&str>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    let cors = match allowed_origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        Some(origin) => cors.allow_origin(origin),
        None => cors.allow_origin(Any),
    };

    let api = Router::new()
        .route("/api/conversations", get(http::routes::list_conversations))
        .route("/api/conversations/:id/messages", get(http::routes::history))
        .route("/api/events/:event_id/group", post(http::routes::create_group))
        .route("/api/events/:event_id/group/members", post(http::routes::add_member));

    Router::new()
        .route("/healthz", get(http::routes::healthz))
        .route("/ws", get(ws::connection::ws_handler))
        .merge(api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
