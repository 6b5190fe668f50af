//! Single entry point shared by the persistent and one-shot channels.

use std::sync::Arc;

use topicast_core::{HttpResponse, Transport};
use tower::ServiceExt;
use tracing::{debug, error};

use super::classify::OperationClassifier;
use super::middleware::OperationPipeline;
use super::operation::OperationError;

/// Classifies a submitted body and runs it through the operation pipeline.
#[derive(Clone)]
pub struct OperationIngress {
    classifier: Arc<OperationClassifier>,
    pipeline: OperationPipeline,
}

impl OperationIngress {
    #[must_use]
    pub fn new(classifier: Arc<OperationClassifier>, pipeline: OperationPipeline) -> Self {
        Self {
            classifier,
            pipeline,
        }
    }

    /// Handles one submitted operation and returns `{statusCode, body}`.
    ///
    /// Never fails: classification errors become a 400 with the error list,
    /// load shedding a 503, and storage or relay failures a 500.
    pub async fn handle(&self, body: &str, transport: Transport) -> HttpResponse {
        let op = match self.classifier.classify(body, transport) {
            Ok(op) => op,
            Err(err) => {
                debug!(error = %err, "operation rejected by classifier");
                metrics::counter!("topicast_operations_rejected_total").increment(1);
                return HttpResponse::errors(err.status_code(), &err.errors());
            }
        };

        match self.pipeline.clone().oneshot(op).await {
            Ok(response) => response,
            Err(err) => {
                if let OperationError::Directory(_)
                | OperationError::Relay(_)
                | OperationError::Internal(_) = &err
                {
                    error!(error = %err, "operation failed");
                }
                HttpResponse::errors(err.status_code(), &[err.to_graphql()])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};
    use topicast_core::OperationSchema;

    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::service::config::ServerConfig;
    use crate::service::dispatcher::WorkDispatcher;
    use crate::service::executor::OperationExecutor;
    use crate::service::middleware::build_operation_pipeline;
    use crate::service::relay::EventRelay;
    use crate::service::router::OperationRouter;
    use crate::service::subscription::SubscriptionManager;

    fn ingress(relay: &EventRelay, max_concurrent: u32) -> OperationIngress {
        let router = OperationRouter::new(
            OperationExecutor::new(WorkDispatcher::new(relay.publisher())),
            SubscriptionManager::new(Arc::new(MemoryDirectory::new()), Duration::from_secs(60)),
        );
        let config = ServerConfig {
            max_concurrent_operations: max_concurrent,
            ..ServerConfig::default()
        };
        OperationIngress::new(
            Arc::new(OperationClassifier::new(Arc::new(OperationSchema::chat().unwrap()))),
            build_operation_pipeline(router, &config),
        )
    }

    fn body(query: &str) -> String {
        json!({ "query": query }).to_string()
    }

    fn error_codes(resp: &HttpResponse) -> Vec<String> {
        let errors: Value = serde_json::from_str(&resp.body).unwrap();
        errors
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["extensions"]["code"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn one_shot_subscription_is_a_client_error() {
        let relay = EventRelay::builder(4).build();
        let resp = ingress(&relay, 10)
            .handle(&body(r#"subscription { chat(chatId: "r") }"#), Transport::OneShot)
            .await;
        assert_eq!(resp.status_code, 400);
        assert_eq!(error_codes(&resp), vec!["TRANSPORT_INCOMPATIBLE".to_string()]);
    }

    #[tokio::test]
    async fn persistent_subscription_is_acknowledged() {
        let relay = EventRelay::builder(4).build();
        let resp = ingress(&relay, 10)
            .handle(
                &body(r#"subscription { chat(chatId: "r") }"#),
                Transport::persistent("conn-A"),
            )
            .await;
        assert_eq!(resp, HttpResponse::ok("Ok"));
    }

    #[tokio::test]
    async fn invalid_document_returns_validation_errors() {
        let relay = EventRelay::builder(4).build();
        let resp = ingress(&relay, 10)
            .handle(&body("{ missing }"), Transport::OneShot)
            .await;
        assert_eq!(resp.status_code, 400);
        assert_eq!(error_codes(&resp), vec!["GRAPHQL_VALIDATION_FAILED".to_string()]);
    }

    #[tokio::test]
    async fn write_after_relay_shutdown_is_a_server_error() {
        let relay = EventRelay::builder(4).build();
        let ingress = ingress(&relay, 10);
        relay.shutdown().await;

        let resp = ingress
            .handle(
                &body(r#"mutation { putEvent(chatId: "r", message: "m") { FailedEntries } }"#),
                Transport::OneShot,
            )
            .await;
        assert_eq!(resp.status_code, 500);
        assert_eq!(error_codes(&resp), vec!["INTERNAL_SERVER_ERROR".to_string()]);
    }

    #[tokio::test]
    async fn zero_capacity_sheds_every_operation() {
        let relay = EventRelay::builder(4).build();
        let resp = ingress(&relay, 0)
            .handle(&body("{ getEvent }"), Transport::OneShot)
            .await;
        assert_eq!(resp.status_code, 503);
        assert_eq!(error_codes(&resp), vec!["SERVICE_UNAVAILABLE".to_string()]);
    }
}
