//! `Topicast` Core: connection records, event envelopes, operation documents,
//! and the client wire messages shared by every transport.

pub mod document;
pub mod envelope;
pub mod messages;
pub mod operation;
pub mod schema;
pub mod types;

pub use document::{parse_document, ArgumentValue, Definition, Document, FieldSelection, OperationType};
pub use envelope::{Envelope, EventKind};
pub use messages::{ErrorCode, GraphQlError, GraphQlResponse, HttpResponse, PushPayload};
pub use operation::{OperationKind, OperationRequest, Transport};
pub use schema::{OperationSchema, SchemaError};
pub use types::{now_millis, ConnectionId, ConnectionRecord};
