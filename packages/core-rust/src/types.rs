use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Opaque identifier of one addressable, long-lived client channel.
///
/// Assigned by the transport when the channel is opened. The directory and
/// fanout only ever compare and echo it back, never interpret it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One `(topic, connection)` subscription held by the connection directory.
///
/// At most one record exists per pair; re-subscribing overwrites
/// `expires_at`. A record whose `expires_at` is not in the future is
/// logically absent even if it is still physically stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    /// Grouping key the connection is interested in.
    pub topic: String,
    /// The subscribed connection.
    pub connection_id: ConnectionId,
    /// Expiry as milliseconds since the Unix epoch.
    pub expires_at: u64,
}

impl ConnectionRecord {
    /// Returns `true` once `now_ms` has reached the record's expiry.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at <= now_ms
    }
}

/// Wall-clock milliseconds since the Unix epoch.
///
/// A clock set before 1970 reads as 0 rather than failing.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
