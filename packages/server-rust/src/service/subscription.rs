//! Subscription lifecycle: subscribe, unsubscribe, and bulk teardown.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use topicast_core::ConnectionId;
use tracing::{debug, warn};

use crate::error::DirectoryError;
use crate::traits::ConnectionDirectory;

/// Outcome of tearing down one connection's subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Topics whose record was deleted.
    pub removed: Vec<String>,
    /// Topics whose delete failed; the record will lapse on expiry.
    pub failed: Vec<String>,
}

/// Writes and removes subscription records on behalf of connections.
#[derive(Clone)]
pub struct SubscriptionManager {
    directory: Arc<dyn ConnectionDirectory>,
    ttl: Duration,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new(directory: Arc<dyn ConnectionDirectory>, ttl: Duration) -> Self {
        Self { directory, ttl }
    }

    /// Records interest of `connection_id` in `topic` for the configured TTL.
    ///
    /// # Errors
    ///
    /// Propagates the directory failure; nothing is retried.
    pub async fn on_subscribe(
        &self,
        topic: &str,
        connection_id: &ConnectionId,
    ) -> Result<(), DirectoryError> {
        self.directory.put(topic, connection_id, self.ttl).await?;
        debug!(%topic, connection = %connection_id, "subscribed");
        metrics::counter!("topicast_subscriptions_total").increment(1);
        Ok(())
    }

    /// Removes a single `(topic, connection)` record.
    ///
    /// # Errors
    ///
    /// Propagates the directory failure.
    pub async fn on_unsubscribe(
        &self,
        topic: &str,
        connection_id: &ConnectionId,
    ) -> Result<(), DirectoryError> {
        self.directory.delete(topic, connection_id).await?;
        debug!(%topic, connection = %connection_id, "unsubscribed");
        Ok(())
    }

    /// Deletes every record owned by `connection_id`.
    ///
    /// Each topic is deleted independently; one failure does not stop the
    /// others. A connection with no subscriptions yields an empty report.
    ///
    /// # Errors
    ///
    /// Only the reverse lookup can fail the whole teardown.
    pub async fn on_disconnect(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<TeardownReport, DirectoryError> {
        let topics = self.directory.find_topics(connection_id).await?;

        let outcomes = join_all(topics.into_iter().map(|topic| async move {
            let result = self.directory.delete(&topic, connection_id).await;
            (topic, result)
        }))
        .await;

        let mut report = TeardownReport::default();
        for (topic, result) in outcomes {
            match result {
                Ok(()) => report.removed.push(topic),
                Err(err) => {
                    warn!(%topic, connection = %connection_id, error = %err, "teardown delete failed");
                    report.failed.push(topic);
                }
            }
        }

        debug!(
            connection = %connection_id,
            removed = report.removed.len(),
            failed = report.failed.len(),
            "connection torn down"
        );
        Ok(report)
    }
}
