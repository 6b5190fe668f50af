//! Write path: turns an accepted write into a request envelope.

use topicast_core::Envelope;
use tracing::debug;
use uuid::Uuid;

use super::relay::Publisher;
use crate::error::RelayError;

/// Publishes request envelopes for accepted writes.
#[derive(Clone)]
pub struct WorkDispatcher {
    publisher: Publisher,
}

impl WorkDispatcher {
    #[must_use]
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }

    /// Publishes `{kind: Request, topic, message}`.
    ///
    /// Returns an event id for the caller's acknowledgement. The id is not
    /// carried on the envelope.
    ///
    /// # Errors
    ///
    /// Propagates the relay's publish failure.
    pub async fn on_write(&self, topic: &str, message: &str) -> Result<Uuid, RelayError> {
        let event_id = Uuid::new_v4();
        let handlers = self.publisher.publish(Envelope::request(topic, message)).await?;
        debug!(%event_id, %topic, handlers, "write dispatched");
        Ok(event_id)
    }
}
