//! Configuration read from env vars (port, signing key, push retry, CORS).

use std::{env, net::{Ipv4Addr, SocketAddr}, time::Duration};

use rand::RngCore;

/// Runtime settings for the realtime server.
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub hmac_key: [u8; 32],
    pub push_max_attempts: u32,
    pub push_backoff: Duration,
    /// `None` allows any origin.
    pub allowed_origin: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            addr: server_addr(),
            hmac_key: hmac_key(),
            push_max_attempts: env_parse::<u32>("GIG_PUSH_MAX_ATTEMPTS").unwrap_or(3).max(1),
            push_backoff: Duration::from_millis(env_parse::<u64>("GIG_PUSH_BACKOFF_MS").unwrap_or(500)),
            allowed_origin: env::var("GIG_ALLOWED_ORIGIN").ok().filter(|o| !o.is_empty()),
        }
    }
}

/// Socket address to bind the server to.
///
/// Reads the `PORT` env var or defaults to 8080, binds to 0.0.0.0.
pub fn server_addr() -> SocketAddr {
    let port = env_parse::<u16>("PORT").unwrap_or(8080);
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
}

/// Token signing key from `GIG_HMAC_KEY` (64 hex chars).
///
/// Falls back to a random key, which invalidates every token on restart.
pub fn hmac_key() -> [u8; 32] {
    let configured = env::var("GIG_HMAC_KEY")
        .ok()
        .and_then(|h| hex::decode(h.trim()).ok())
        .and_then(|v| <[u8; 32]>::try_from(v).ok());
    match configured {
        Some(key) => key,
        None => {
            tracing::warn!("GIG_HMAC_KEY missing or invalid, using an ephemeral signing key");
            let mut key = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut key);
            key
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
