//! One `operation` span per classified operation, plus a counter and a
//! latency histogram labelled by kind and outcome.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::field::Empty;
use tracing::{info, info_span, Instrument, Span};

use crate::service::operation::{Operation, OperationError, OperationResponse};

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Label for the `outcome` span field and metric label.
fn outcome(result: &Result<OperationResponse, OperationError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(OperationError::Overloaded) => "shed",
        Err(OperationError::BadInput(_)) => "rejected",
        Err(_) => "error",
    }
}

impl<S> Service<Operation> for MetricsService<S>
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
        let kind = op.kind.as_str();
        let span = info_span!(
            "operation",
            kind,
            call_id = op.call_id,
            persistent = op.transport.is_persistent(),
            duration_ms = Empty,
            outcome = Empty,
        );
        let fut = span.in_scope(|| self.inner.call(op));

        Box::pin(
            async move {
                let started = Instant::now();
                let result = fut.await;
                let elapsed = started.elapsed();
                let outcome = outcome(&result);

                let span = Span::current();
                #[allow(clippy::cast_possible_truncation)]
                span.record("duration_ms", elapsed.as_millis() as u64);
                span.record("outcome", outcome);

                metrics::counter!("topicast_operations_total", "kind" => kind, "outcome" => outcome)
                    .increment(1);
                metrics::histogram!("topicast_operation_duration_seconds", "kind" => kind)
                    .record(elapsed.as_secs_f64());
                info!("operation complete");

                result
            }
            .instrument(span),
        )
    }
}
