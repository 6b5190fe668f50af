//! The operation stack both channels submit into.

use tower::ServiceBuilder;

use super::load_shed::{LoadShedLayer, LoadShedService};
use super::metrics::{MetricsLayer, MetricsService};
use crate::service::config::ServerConfig;
use crate::service::router::OperationRouter;

/// Cloneable; clones share the admission permits.
pub type OperationPipeline = LoadShedService<MetricsService<OperationRouter>>;

/// Admission runs first so shed operations cost nothing; metrics wrap only
/// the operations that were admitted.
#[must_use]
pub fn build_operation_pipeline(router: OperationRouter, config: &ServerConfig) -> OperationPipeline {
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_operations))
        .layer(MetricsLayer)
        .service(router)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tower::ServiceExt;

    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::service::middleware::load_shed::tests::read_op;
    use crate::service::operation::OperationError;
    use crate::service::{EventRelay, OperationExecutor, SubscriptionManager, WorkDispatcher};

    fn router(relay: &EventRelay) -> OperationRouter {
        OperationRouter::new(
            OperationExecutor::new(WorkDispatcher::new(relay.publisher())),
            SubscriptionManager::new(Arc::new(MemoryDirectory::new()), Duration::from_secs(60)),
        )
    }

    #[tokio::test]
    async fn reads_reach_the_router() {
        let relay = EventRelay::builder(4).build();
        let pipeline = build_operation_pipeline(router(&relay), &ServerConfig::default());

        let resp = pipeline.oneshot(read_op(1)).await.unwrap();
        assert!(resp.body.contains("Hello from topicast!"));
    }

    #[tokio::test]
    async fn zero_capacity_sheds_everything() {
        let relay = EventRelay::builder(4).build();
        let config = ServerConfig {
            max_concurrent_operations: 0,
            ..ServerConfig::default()
        };
        let pipeline = build_operation_pipeline(router(&relay), &config);

        let result = pipeline.oneshot(read_op(1)).await;
        assert!(matches!(result, Err(OperationError::Overloaded)));
    }
}
