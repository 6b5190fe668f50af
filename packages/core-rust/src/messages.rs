//! Client-facing wire messages.
//!
//! Errors follow the GraphQL error shape so existing client libraries can
//! surface them unchanged. All structs serialize with `camelCase` keys.

use serde::{Deserialize, Serialize};

/// Machine-readable error category placed under `extensions.code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "GRAPHQL_PARSE_FAILED")]
    ParseFailed,
    #[serde(rename = "GRAPHQL_VALIDATION_FAILED")]
    ValidationFailed,
    #[serde(rename = "TRANSPORT_INCOMPATIBLE")]
    TransportIncompatible,
    #[serde(rename = "BAD_USER_INPUT")]
    BadUserInput,
    #[serde(rename = "SERVICE_UNAVAILABLE")]
    ServiceUnavailable,
    #[serde(rename = "INTERNAL_SERVER_ERROR")]
    Internal,
}

/// Position inside an operation document (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorExtensions {
    pub code: ErrorCode,
}

/// A single client-visible error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<SourceLocation>,
    pub extensions: ErrorExtensions,
}

impl GraphQlError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            extensions: ErrorExtensions { code },
        }
    }

    #[must_use]
    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.locations.push(SourceLocation { line, column });
        self
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.extensions.code
    }
}

/// Result body for reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlResponse {
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQlError>,
}

impl GraphQlResponse {
    #[must_use]
    pub fn data(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }
}

/// Payload pushed to each subscriber during fanout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub data: String,
}

/// Response shape of the one-shot channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: String,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    /// Serializes `errors` as a JSON array body with the given status.
    #[must_use]
    pub fn errors(status_code: u16, errors: &[GraphQlError]) -> Self {
        let body = serde_json::to_string(errors).unwrap_or_else(|_| "[]".to_string());
        Self::new(status_code, body)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}
