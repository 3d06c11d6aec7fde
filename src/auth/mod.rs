//! Handshake credentials: HMAC-signed bearer tokens carrying a user identity.
//!
//! Token layout is `base64url(claims).base64url(hmac_sha256(claims))`.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::OffsetDateTime;

use crate::util::id::UserId;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Organizer,
    Worker,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Organizer => f.write_str("organizer"),
            Role::Worker => f.write_str("worker"),
        }
    }
}

/// Verified identity bound to a connection for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credential")]
    Missing,
    #[error("malformed credential: {0}")]
    Malformed(&'static str),
    #[error("invalid signature")]
    BadSignature,
    #[error("credential expired")]
    Expired,
    #[error("credential has no subject")]
    NoSubject,
}

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: Role,
    exp: i64,
}

/// Issues and verifies handshake tokens with one shared key.
#[derive(Clone)]
pub struct TokenAuthority {
    key: [u8; 32],
}

impl TokenAuthority {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Mint a token valid for `ttl`. Used by the login service and tests.
    pub fn issue(&self, identity: &Identity, ttl: time::Duration) -> String {
        let claims = Claims {
            sub: identity.user_id.clone(),
            role: identity.role,
            exp: (OffsetDateTime::now_utc() + ttl).unix_timestamp(),
        };
        // Serializing a struct of strings and integers cannot fail.
        let payload = serde_json::to_vec(&claims).unwrap_or_default();
        let sig = self.mac(&payload).finalize().into_bytes();
        format!("{}.{}", URL_SAFE_NO_PAD.encode(&payload), URL_SAFE_NO_PAD.encode(sig))
    }

    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }

        let mut parts = token.split('.');
        let (Some(p1), Some(p2), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(AuthError::Malformed("expected two segments"));
        };
        let payload = URL_SAFE_NO_PAD
            .decode(p1)
            .map_err(|_| AuthError::Malformed("payload is not base64url"))?;
        let sig = URL_SAFE_NO_PAD
            .decode(p2)
            .map_err(|_| AuthError::Malformed("signature is not base64url"))?;
        self.mac(&payload)
            .verify_slice(&sig)
            .map_err(|_| AuthError::BadSignature)?;

        let claims: Claims = serde_json::from_slice(&payload)
            .map_err(|_| AuthError::Malformed("claims are not valid json"))?;
        if claims.exp <= OffsetDateTime::now_utc().unix_timestamp() {
            return Err(AuthError::Expired);
        }
        if claims.sub.trim().is_empty() {
            return Err(AuthError::NoSubject);
        }

        Ok(Identity { user_id: claims.sub, role: claims.role })
    }

    fn mac(&self, data: &[u8]) -> HmacSha256 {
        // HMAC accepts keys of any length.
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .unwrap_or_else(|_| unreachable!("hmac key length is unrestricted"));
        mac.update(data);
        mac
    }
}
