//! Admission control: at most `max_concurrent_operations` run at once and
//! the rest fail fast with `OperationError::Overloaded` (503 on the one-shot
//! channel) instead of queueing behind them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Semaphore;
use tower::{Layer, Service};
use tracing::debug;

use crate::service::operation::{Operation, OperationError, OperationResponse};

#[derive(Debug)]
struct Admission {
    permits: Arc<Semaphore>,
    limit: usize,
}

/// Every service built from one layer, and every clone of those services,
/// draws from the same permits.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    admission: Arc<Admission>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        let limit = max_concurrent as usize;
        Self {
            admission: Arc::new(Admission {
                permits: Arc::new(Semaphore::new(limit)),
                limit,
            }),
        }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            admission: Arc::clone(&self.admission),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    admission: Arc<Admission>,
}

impl<S> LoadShedService<S> {
    /// Operations that could start right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.admission.permits.available_permits()
    }

    fn in_use(&self) -> usize {
        self.admission.limit - self.available()
    }
}

impl<S> Service<Operation> for LoadShedService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let Ok(permit) = Arc::clone(&self.admission.permits).try_acquire_owned() else {
            debug!(call_id = op.call_id, kind = op.kind.as_str(), "operation shed");
            metrics::counter!("topicast_operations_shed_total").increment(1);
            return Box::pin(async { Err(OperationError::Overloaded) });
        };
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("topicast_operations_in_flight").set(self.in_use() as f64);

        let fut = self.inner.call(op);
        Box::pin(async move {
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use topicast_core::{parse_document, OperationKind, OperationRequest, Transport};
    use tokio::sync::Notify;
    use tower::ServiceExt;

    use super::*;

    /// Answers with the call id, after its gate is notified if it has one.
    #[derive(Clone)]
    pub(crate) struct Gated {
        gate: Option<Arc<Notify>>,
    }

    impl Gated {
        pub(crate) fn open() -> Self {
            Self { gate: None }
        }

        pub(crate) fn closed(gate: Arc<Notify>) -> Self {
            Self { gate: Some(gate) }
        }
    }

    impl Service<Operation> for Gated {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future =
            Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, op: Operation) -> Self::Future {
            let gate = self.gate.clone();
            Box::pin(async move {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                Ok(OperationResponse::ok(op.call_id.to_string()))
            })
        }
    }

    pub(crate) fn read_op(call_id: u64) -> Operation {
        Operation {
            call_id,
            kind: OperationKind::Read,
            document: parse_document("{ getEvent }").unwrap(),
            request: OperationRequest::new("{ getEvent }"),
            transport: Transport::OneShot,
        }
    }

    #[tokio::test]
    async fn admits_under_the_limit() {
        let svc = LoadShedLayer::new(2).layer(Gated::open());
        let resp = svc.oneshot(read_op(7)).await.unwrap();
        assert_eq!(resp.body, "7");
    }

    #[tokio::test]
    async fn sheds_while_full_and_recovers_after() {
        let gate = Arc::new(Notify::new());
        let mut svc = LoadShedLayer::new(1).layer(Gated::closed(gate.clone()));

        let held = svc.call(read_op(1));
        assert_eq!(svc.available(), 0);
        assert!(matches!(svc.call(read_op(2)).await, Err(OperationError::Overloaded)));

        gate.notify_one();
        held.await.unwrap();
        assert_eq!(svc.available(), 1);
    }

    #[tokio::test]
    async fn clones_share_permits() {
        let gate = Arc::new(Notify::new());
        let mut first = LoadShedLayer::new(1).layer(Gated::closed(gate));
        let mut second = first.clone();

        let _held = first.call(read_op(1));

        assert_eq!(second.available(), 0);
        assert!(matches!(second.call(read_op(2)).await, Err(OperationError::Overloaded)));
    }

    #[tokio::test]
    async fn dropping_a_pending_operation_returns_its_permit() {
        let gate = Arc::new(Notify::new());
        let mut svc = LoadShedLayer::new(1).layer(Gated::closed(gate));

        let pending = svc.call(read_op(1));
        assert_eq!(svc.available(), 0);
        drop(pending);
        assert_eq!(svc.available(), 1);
    }
}
