//! Operation classification: turns a submitted body into a typed `Operation`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use topicast_core::{ErrorCode, GraphQlError, OperationKind, OperationRequest, Transport};
use tracing::debug;

use super::operation::{ClassifyError, Operation};
use crate::traits::SchemaProvider;

// ---------------------------------------------------------------------------
// OperationClassifier
// ---------------------------------------------------------------------------

/// Classifies submitted operations into `Read`, `Write` or `Subscribe`.
///
/// A single parse and validate pass runs per call. Only the first definition
/// of the document is considered.
pub struct OperationClassifier {
    schema: Arc<dyn SchemaProvider>,
    call_id_counter: AtomicU64,
}

impl OperationClassifier {
    #[must_use]
    pub fn new(schema: Arc<dyn SchemaProvider>) -> Self {
        Self {
            schema,
            call_id_counter: AtomicU64::new(1),
        }
    }

    fn next_call_id(&self) -> u64 {
        self.call_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Classify a raw request body (`{"query": ..., "variables": ...}`).
    ///
    /// # Errors
    ///
    /// A body that is not a valid request object is reported as
    /// `ClassifyError::Syntax`; otherwise see [`Self::classify_request`].
    pub fn classify(&self, body: &str, transport: Transport) -> Result<Operation, ClassifyError> {
        let request = OperationRequest::from_json(body).map_err(|err| {
            ClassifyError::Syntax(GraphQlError::new(
                ErrorCode::ParseFailed,
                format!("Request body is not a valid operation: {err}"),
            ))
        })?;
        self.classify_request(request, transport)
    }

    /// Classify an already decoded request.
    ///
    /// # Errors
    ///
    /// - `ClassifyError::Syntax` when the document does not parse (no
    ///   semantic check runs)
    /// - `ClassifyError::Semantic` with the validator's errors, verbatim
    /// - `ClassifyError::TransportIncompatible` for a subscription over a
    ///   one-shot transport
    pub fn classify_request(
        &self,
        request: OperationRequest,
        transport: Transport,
    ) -> Result<Operation, ClassifyError> {
        let document = self.schema.parse(&request.query).map_err(ClassifyError::Syntax)?;

        let errors = self.schema.validate(&document);
        if !errors.is_empty() {
            debug!(count = errors.len(), "operation failed validation");
            return Err(ClassifyError::Semantic(errors));
        }

        let kind = match document.first_operation() {
            Some(op) => op.operation_type.kind(),
            None => {
                return Err(ClassifyError::Semantic(vec![GraphQlError::new(
                    ErrorCode::ValidationFailed,
                    "Document must begin with an operation definition.",
                )]))
            }
        };

        if kind == OperationKind::Subscribe && !transport.is_persistent() {
            return Err(ClassifyError::TransportIncompatible);
        }

        Ok(Operation {
            call_id: self.next_call_id(),
            kind,
            document,
            request,
            transport,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
