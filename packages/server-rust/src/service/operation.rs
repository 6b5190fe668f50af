//! Types flowing through the operation pipeline.

use topicast_core::{
    Document, ErrorCode, GraphQlError, HttpResponse, OperationKind, OperationRequest, Transport,
};

use crate::error::{DirectoryError, RelayError};

/// A submitted operation that passed classification.
///
/// `kind` is derived from the first definition of `document`. A `Subscribe`
/// operation is only ever constructed with a persistent transport.
#[derive(Debug, Clone)]
pub struct Operation {
    pub call_id: u64,
    pub kind: OperationKind,
    pub document: Document,
    pub request: OperationRequest,
    pub transport: Transport,
}

/// Response produced by the router: a status code and a textual body.
pub type OperationResponse = HttpResponse;

/// Errors returned by operation handlers after classification.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("{0}")]
    BadInput(String),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OperationError {
    /// Status code reported to the caller for this failure.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadInput(_) => 400,
            Self::Overloaded => 503,
            Self::Directory(_) | Self::Relay(_) | Self::Internal(_) => 500,
        }
    }

    /// Client-facing error entry for this failure.
    #[must_use]
    pub fn to_graphql(&self) -> GraphQlError {
        match self {
            Self::BadInput(message) => GraphQlError::new(ErrorCode::BadUserInput, message.clone()),
            Self::Overloaded => GraphQlError::new(ErrorCode::ServiceUnavailable, self.to_string()),
            Self::Directory(_) | Self::Relay(_) | Self::Internal(_) => {
                GraphQlError::new(ErrorCode::Internal, "Internal server error")
            }
        }
    }
}

/// Errors from classifying a submitted operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClassifyError {
    /// The body or document did not parse; no semantic check ran.
    #[error("syntax error: {}", .0.message)]
    Syntax(GraphQlError),
    /// Schema validation failed; errors are returned verbatim.
    #[error("{} validation error(s)", .0.len())]
    Semantic(Vec<GraphQlError>),
    /// A subscription arrived over a one-shot channel.
    #[error("subscriptions require a persistent connection")]
    TransportIncompatible,
}

impl ClassifyError {
    /// Client-facing error entries.
    #[must_use]
    pub fn errors(&self) -> Vec<GraphQlError> {
        match self {
            Self::Syntax(err) => vec![err.clone()],
            Self::Semantic(errors) => errors.clone(),
            Self::TransportIncompatible => vec![GraphQlError::new(
                ErrorCode::TransportIncompatible,
                "Subscription not supported over a one-shot request",
            )],
        }
    }

    #[must_use]
    pub fn status_code(&self) -> u16 {
        400
    }
}
