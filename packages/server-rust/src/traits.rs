use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use topicast_core::{ConnectionId, Document, GraphQlError, OperationSchema};

use crate::error::{DeliveryError, DirectoryError, TransformError};

/// Durable bidirectional index of topic subscriptions.
///
/// Implementations keep the forward index (topic -> connections) and the
/// reverse index (connection -> topics) consistent at all times:
/// `c ∈ find_subscribers(t)` if and only if `t ∈ find_topics(c)`.
/// Expired records are filtered on every read.
#[async_trait]
pub trait ConnectionDirectory: Send + Sync {
    /// Upserts the `(topic, connection)` record; re-putting only refreshes expiry.
    async fn put(
        &self,
        topic: &str,
        connection_id: &ConnectionId,
        ttl: Duration,
    ) -> Result<(), DirectoryError>;

    /// Connections holding an unexpired record for `topic`.
    async fn find_subscribers(&self, topic: &str) -> Result<BTreeSet<ConnectionId>, DirectoryError>;

    /// Topics held by `connection_id`, via the reverse index.
    async fn find_topics(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<BTreeSet<String>, DirectoryError>;

    /// Removes one record. Removing an absent pair is not an error.
    async fn delete(&self, topic: &str, connection_id: &ConnectionId) -> Result<(), DirectoryError>;

    /// Physically drops expired records, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, DirectoryError>;
}

/// Delivery of a payload to one open persistent connection.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn push(&self, connection_id: &ConnectionId, payload: String) -> Result<(), DeliveryError>;
}

/// Text transform applied by relay workers (e.g. translation).
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, text: &str, variant: &str) -> Result<String, TransformError>;
}

/// Parse and validate capability consumed by the classifier.
pub trait SchemaProvider: Send + Sync {
    /// Parses document text.
    ///
    /// # Errors
    ///
    /// Returns a single syntax error when the text does not parse.
    fn parse(&self, text: &str) -> Result<Document, GraphQlError>;

    /// Validates a parsed document; an empty list means valid.
    fn validate(&self, document: &Document) -> Vec<GraphQlError>;
}

impl SchemaProvider for OperationSchema {
    fn parse(&self, text: &str) -> Result<Document, GraphQlError> {
        topicast_core::parse_document(text)
    }

    fn validate(&self, document: &Document) -> Vec<GraphQlError> {
        OperationSchema::validate(self, document)
    }
}
