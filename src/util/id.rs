//! ID utilities (ULIDs for connections, UUIDs for persisted rows).

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;
use uuid::Uuid;

/// Opaque user id issued by the account service.
pub type UserId = String;

/// Opaque event id from the marketplace's event records.
pub type EventId = String;

/// Identifier of one open websocket. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// ULIDs sort by creation time, which keeps connection logs readable.
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate an id for a conversation or message row.
pub fn new_row_id() -> Uuid {
    Uuid::new_v4()
}
