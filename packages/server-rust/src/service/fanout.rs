//! Delivery of response envelopes to every current subscriber of a topic.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::join_all;
use topicast_core::{ConnectionId, Envelope};
use tracing::{debug, info};

use super::relay::{EnvelopeHandler, Publisher};
use crate::error::DirectoryError;
use crate::traits::{ConnectionDirectory, PushGateway};

/// Per-event delivery outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutResult {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: Vec<ConnectionId>,
}

/// Pushes each response envelope to the topic's subscribers as of delivery time.
#[derive(Clone)]
pub struct NotificationFanout {
    directory: Arc<dyn ConnectionDirectory>,
    push: Arc<dyn PushGateway>,
}

impl NotificationFanout {
    #[must_use]
    pub fn new(directory: Arc<dyn ConnectionDirectory>, push: Arc<dyn PushGateway>) -> Self {
        Self { directory, push }
    }

    /// Pushes `envelope.message` to every subscriber of `envelope.topic`.
    ///
    /// Pushes are issued concurrently and awaited independently. Delivery
    /// failures are recorded in the result, never returned as errors. A topic
    /// with no subscribers yields a zero-attempt result.
    ///
    /// # Errors
    ///
    /// Only the subscriber lookup can fail.
    pub async fn on_response_event(&self, envelope: &Envelope) -> Result<FanoutResult, DirectoryError> {
        let started = Instant::now();
        let subscribers = self.directory.find_subscribers(&envelope.topic).await?;
        if subscribers.is_empty() {
            debug!(topic = %envelope.topic, "no subscribers for response");
            return Ok(FanoutResult::default());
        }

        let outcomes = join_all(subscribers.into_iter().map(|connection_id| async move {
            let result = self.push.push(&connection_id, envelope.message.clone()).await;
            (connection_id, result)
        }))
        .await;

        let mut result = FanoutResult {
            attempted: outcomes.len(),
            ..FanoutResult::default()
        };
        for (connection_id, outcome) in outcomes {
            match outcome {
                Ok(()) => result.delivered += 1,
                Err(err) => {
                    debug!(connection = %connection_id, error = %err, "push failed");
                    result.failed.push(connection_id);
                }
            }
        }

        metrics::counter!("topicast_fanout_delivered_total").increment(result.delivered as u64);
        metrics::counter!("topicast_fanout_failed_total").increment(result.failed.len() as u64);
        metrics::histogram!("topicast_fanout_duration_seconds").record(started.elapsed().as_secs_f64());
        info!(
            topic = %envelope.topic,
            source = %envelope.source,
            attempted = result.attempted,
            delivered = result.delivered,
            failed = result.failed.len(),
            "fanout complete"
        );
        Ok(result)
    }
}

#[async_trait]
impl EnvelopeHandler for NotificationFanout {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn handle(&self, envelope: &Envelope, _publisher: &Publisher) -> anyhow::Result<()> {
        self.on_response_event(envelope).await?;
        Ok(())
    }
}
