use std::sync::Arc;

use gig_realtime::auth::TokenAuthority;
use gig_realtime::config::Config;
use gig_realtime::hub::Hub;
use gig_realtime::push::{LogPushSender, PushQueue, RetryPolicy};
use gig_realtime::room::LocalRooms;
use gig_realtime::store::InMemoryStore;
use gig_realtime::{app, telemetry, AppState};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init(telemetry::DEFAULT_FILTER);
    let config = Config::from_env();

    let (push, _push_worker) = PushQueue::spawn(
        Arc::new(LogPushSender),
        RetryPolicy { max_attempts: config.push_max_attempts, backoff: config.push_backoff },
    );
    let hub = Hub::new(Arc::new(InMemoryStore::new()), Arc::new(LocalRooms::new()), push);
    let state = AppState { hub, tokens: TokenAuthority::new(config.hmac_key) };

    let router = app(state, config.allowed_origin.as_deref());
    tracing::info!(addr = %config.addr, "listening");
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
