//! Event envelopes carried by the relay.
//!
//! Two kinds exist: a request (a deferred write waiting for a transform
//! worker) and a response (a finished transform waiting for fanout).
//! Envelopes are immutable once built and carry no identity beyond their
//! fields.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::now_millis;

/// Source tag used for request envelopes produced by the write path.
pub const OPERATIONS_SOURCE: &str = "operations";

/// Discriminant used by the relay to route envelopes to handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A write operation waiting to be transformed.
    Request,
    /// A transformed message ready for delivery to topic subscribers.
    Response,
}

impl EventKind {
    /// Stable label used in logs and metric tags.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit published on the event relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub kind: EventKind,
    /// Producer of the envelope, e.g. `operations` or `transform.fr`.
    pub source: String,
    pub topic: String,
    pub message: String,
    /// Milliseconds since the Unix epoch at construction time.
    pub published_at: u64,
}

impl Envelope {
    /// Builds a request envelope for a deferred write on `topic`.
    #[must_use]
    pub fn request(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Request,
            source: OPERATIONS_SOURCE.to_string(),
            topic: topic.into(),
            message: message.into(),
            published_at: now_millis(),
        }
    }

    /// Builds a response envelope produced by `source` for `topic`.
    #[must_use]
    pub fn response(
        source: impl Into<String>,
        topic: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: EventKind::Response,
            source: source.into(),
            topic: topic.into(),
            message: message.into(),
            published_at: now_millis(),
        }
    }
}
