//! Tracing initialization.

use tracing_subscriber::{fmt, EnvFilter, prelude::*};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,gig_realtime=debug,tower_http=info,axum=info";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `default_filter`, e.g.
/// `RUST_LOG=debug,gig_realtime::call=trace`.
pub fn init(default_filter: &str) {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
