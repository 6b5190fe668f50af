//! Error types returned by the external capabilities.
//!
//! Each failure is scoped to the unit of work that produced it; none of
//! these is fatal to the process.

use thiserror::Error;
use topicast_core::ConnectionId;

/// Failure reading or writing the connection directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory {operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },
}

impl DirectoryError {
    pub fn backend(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Backend {
            operation,
            message: err.to_string(),
        }
    }
}

/// Failure pushing a payload to a single connection.
///
/// Expected during normal operation (clients disconnect at any time) and
/// never escalated beyond the fanout result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("connection {0} is no longer open")]
    Gone(ConnectionId),
    #[error("push to connection {0} timed out")]
    Timeout(ConnectionId),
    #[error("push to connection {connection_id} failed: {message}")]
    Transport {
        connection_id: ConnectionId,
        message: String,
    },
}

/// Failure handing an envelope to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("event relay is shut down")]
    Closed,
    #[error("handler `{handler}` is no longer accepting envelopes")]
    HandlerGone { handler: String },
}

/// Failure transforming a message.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("transform request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("transform service answered with status {status}")]
    Status { status: u16 },
    #[error("transform rejected input: {0}")]
    Rejected(String),
}
