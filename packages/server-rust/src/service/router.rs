//! Operation routing: dispatches a classified `Operation` by its kind.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use anyhow::anyhow;
use topicast_core::OperationKind;
use tower::Service;

use super::executor::OperationExecutor;
use super::operation::{Operation, OperationError, OperationResponse};
use super::subscription::SubscriptionManager;

/// Reply sent to the subscribing connection once its record is written.
pub const SUBSCRIBE_ACK: &str = "Ok";

// ---------------------------------------------------------------------------
// OperationRouter
// ---------------------------------------------------------------------------

/// Routes `Read` and `Write` to the executor and `Subscribe` to the
/// subscription manager.
///
/// Cheap to clone; every clone shares the same handlers.
#[derive(Clone)]
pub struct OperationRouter {
    executor: OperationExecutor,
    subscriptions: SubscriptionManager,
}

impl OperationRouter {
    #[must_use]
    pub fn new(executor: OperationExecutor, subscriptions: SubscriptionManager) -> Self {
        Self {
            executor,
            subscriptions,
        }
    }
}

/// Subscribe handling: the topic is the first argument of the first root field.
async fn subscribe(
    subscriptions: SubscriptionManager,
    op: Operation,
) -> Result<OperationResponse, OperationError> {
    let connection_id = op
        .transport
        .connection_id()
        .ok_or_else(|| OperationError::Internal(anyhow!("subscribe without a persistent connection")))?;

    let topic = op
        .document
        .first_operation()
        .and_then(|definition| definition.first_field())
        .and_then(|field| field.arguments.first())
        .and_then(|argument| argument.value.resolve_string(op.request.variables.as_ref()))
        .ok_or_else(|| OperationError::BadInput("subscription requires a string topic argument".into()))?;

    subscriptions.on_subscribe(&topic, connection_id).await?;
    Ok(OperationResponse::ok(SUBSCRIBE_ACK))
}

impl Service<Operation> for OperationRouter {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        match op.kind {
            OperationKind::Read => {
                let result = self.executor.read(&op);
                Box::pin(async move { result })
            }
            OperationKind::Write => {
                let executor = self.executor.clone();
                Box::pin(async move { executor.write(&op).await })
            }
            OperationKind::Subscribe => Box::pin(subscribe(self.subscriptions.clone(), op)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
