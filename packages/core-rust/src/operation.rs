//! Operation classification types and the client request wire shape.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::ConnectionId;

/// What an operation does once it has been classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Answered synchronously, no side effects.
    Read,
    /// Deferred to asynchronous processing through the relay.
    Write,
    /// Registers interest in a topic for the calling connection.
    Subscribe,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Subscribe => "subscribe",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The channel an operation arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// A long-lived connection that can later receive pushed notifications.
    Persistent { connection_id: ConnectionId },
    /// A request/response exchange with no addressable connection behind it.
    OneShot,
}

impl Transport {
    #[must_use]
    pub fn persistent(connection_id: impl Into<ConnectionId>) -> Self {
        Self::Persistent {
            connection_id: connection_id.into(),
        }
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent { .. })
    }

    /// The connection behind a persistent transport.
    #[must_use]
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        match self {
            Self::Persistent { connection_id } => Some(connection_id),
            Self::OneShot => None,
        }
    }
}

/// Body submitted by clients on both channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    /// Operation document text.
    pub query: String,
    /// Values for `$variables` referenced by the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
}

impl OperationRequest {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
            operation_name: None,
        }
    }

    #[must_use]
    pub fn with_variables(mut self, variables: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = variables {
            self.variables = Some(map);
        }
        self
    }

    /// Decodes a raw request body.
    ///
    /// Line breaks are stripped before decoding, so clients may pretty-print
    /// their query strings without escaping newlines.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the body is not a request object.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        let flattened: String = body.chars().filter(|c| *c != '\n' && *c != '\r').collect();
        serde_json::from_str(&flattened)
    }

    /// Looks up a variable by name.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&serde_json::Value> {
        self.variables.as_ref().and_then(|vars| vars.get(name))
    }
}
