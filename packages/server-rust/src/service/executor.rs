//! Resolution of read and write operations.

use serde_json::{json, Map, Value};
use topicast_core::{FieldSelection, GraphQlResponse, OperationRequest};

use super::dispatcher::WorkDispatcher;
use super::operation::{Operation, OperationError, OperationResponse};

/// Value resolved for `getEvent`.
pub const READ_GREETING: &str = "Hello from topicast!";

/// Executes `Read` and `Write` operations against the chat root fields.
#[derive(Clone)]
pub struct OperationExecutor {
    dispatcher: WorkDispatcher,
}

impl OperationExecutor {
    #[must_use]
    pub fn new(dispatcher: WorkDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Resolves every root field of a query.
    ///
    /// # Errors
    ///
    /// Returns `OperationError::Internal` if the response cannot be encoded.
    pub fn read(&self, op: &Operation) -> Result<OperationResponse, OperationError> {
        let mut data = Map::new();
        for field in root_fields(op) {
            let value = match field.name.as_str() {
                "getEvent" => Value::String(READ_GREETING.to_string()),
                "__typename" => Value::String("Query".to_string()),
                _ => Value::Null,
            };
            data.insert(field.response_key().to_string(), value);
        }
        respond(data)
    }

    /// Resolves every root field of a mutation, dispatching each `putEvent`.
    ///
    /// # Errors
    ///
    /// - `OperationError::BadInput` when `chatId` or `message` is missing
    /// - `OperationError::Relay` when the request envelope cannot be published
    pub async fn write(&self, op: &Operation) -> Result<OperationResponse, OperationError> {
        // Arguments of every field are checked before anything is dispatched.
        let mut planned = Vec::new();
        for field in root_fields(op) {
            let step = match field.name.as_str() {
                "putEvent" => WriteStep::Put(write_arguments(field, &op.request)?),
                "__typename" => WriteStep::Done(Value::String("Mutation".to_string())),
                _ => WriteStep::Done(Value::Null),
            };
            planned.push((field.response_key(), step));
        }

        let mut data = Map::new();
        for (key, step) in planned {
            let value = match step {
                WriteStep::Put((topic, message)) => {
                    let event_id = self.dispatcher.on_write(&topic, &message).await?;
                    json!({
                        "Entries": [{ "EventId": event_id.to_string() }],
                        "FailedEntries": 0,
                    })
                }
                WriteStep::Done(value) => value,
            };
            data.insert(key.to_string(), value);
        }
        respond(data)
    }
}

enum WriteStep {
    /// `(topic, message)` to dispatch.
    Put((String, String)),
    Done(Value),
}

fn root_fields(op: &Operation) -> &[FieldSelection] {
    op.document
        .first_operation()
        .map_or(&[][..], |definition| definition.fields.as_slice())
}

fn write_arguments(
    field: &FieldSelection,
    request: &OperationRequest,
) -> Result<(String, String), OperationError> {
    let variables = request.variables.as_ref();
    let resolve = |name: &str| {
        field
            .argument(name)
            .and_then(|value| value.resolve_string(variables))
            .ok_or_else(|| {
                OperationError::BadInput(format!("putEvent requires a string `{name}` argument"))
            })
    };
    Ok((resolve("chatId")?, resolve("message")?))
}

fn respond(data: Map<String, Value>) -> Result<OperationResponse, OperationError> {
    let body = serde_json::to_string(&GraphQlResponse::data(Value::Object(data)))
        .map_err(|err| OperationError::Internal(err.into()))?;
    Ok(OperationResponse::ok(body))
}
