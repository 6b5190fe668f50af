//! Durable [`ConnectionDirectory`] on an embedded `redb` file.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use topicast_core::{now_millis, ConnectionId};
use tracing::debug;

use super::expiry_after;
use crate::error::DirectoryError;
use crate::traits::ConnectionDirectory;

/// `(topic, connection) -> expires_at`
const SUBSCRIPTIONS: TableDefinition<(&str, &str), u64> = TableDefinition::new("subscriptions");
/// `(connection, topic) -> expires_at`
const BY_CONNECTION: TableDefinition<(&str, &str), u64> =
    TableDefinition::new("subscriptions_by_connection");

fn backend<E: Into<redb::Error>>(operation: &'static str) -> impl Fn(E) -> DirectoryError {
    move |err| DirectoryError::backend(operation, err.into())
}

/// Directory persisted in a single `redb` database.
///
/// Both tables are written in the same transaction so the forward and
/// reverse indexes never diverge, even across a crash.
#[derive(Clone)]
pub struct RedbDirectory {
    db: Arc<Database>,
}

impl RedbDirectory {
    /// Opens (or creates) the database at `path` and ensures both tables exist.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Backend`] when the file cannot be opened or
    /// the tables cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let db = Database::create(path.as_ref()).map_err(backend("open"))?;
        let txn = db.begin_write().map_err(backend("open"))?;
        {
            txn.open_table(SUBSCRIPTIONS).map_err(backend("open"))?;
            txn.open_table(BY_CONNECTION).map_err(backend("open"))?;
        }
        txn.commit().map_err(backend("open"))?;
        debug!(path = %path.as_ref().display(), "opened redb connection directory");
        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, operation: &'static str, f: F) -> Result<T, DirectoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, DirectoryError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|err| DirectoryError::backend(operation, err))?
    }

    fn scan_prefix(
        db: &Database,
        table: TableDefinition<(&str, &str), u64>,
        prefix: &str,
        now: u64,
        operation: &'static str,
    ) -> Result<BTreeSet<String>, DirectoryError> {
        let txn = db.begin_read().map_err(backend(operation))?;
        let table = txn.open_table(table).map_err(backend(operation))?;
        let mut found = BTreeSet::new();
        for entry in table.range((prefix, "")..).map_err(backend(operation))? {
            let (key, expires_at) = entry.map_err(backend(operation))?;
            let (head, tail) = key.value();
            if head != prefix {
                break;
            }
            if expires_at.value() > now {
                found.insert(tail.to_string());
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl ConnectionDirectory for RedbDirectory {
    async fn put(
        &self,
        topic: &str,
        connection_id: &ConnectionId,
        ttl: Duration,
    ) -> Result<(), DirectoryError> {
        let topic = topic.to_string();
        let conn = connection_id.as_str().to_string();
        let expires_at = expiry_after(now_millis(), ttl);
        self.blocking("put", move |db| {
            let txn = db.begin_write().map_err(backend("put"))?;
            {
                let mut forward = txn.open_table(SUBSCRIPTIONS).map_err(backend("put"))?;
                forward
                    .insert((topic.as_str(), conn.as_str()), expires_at)
                    .map_err(backend("put"))?;
                let mut reverse = txn.open_table(BY_CONNECTION).map_err(backend("put"))?;
                reverse
                    .insert((conn.as_str(), topic.as_str()), expires_at)
                    .map_err(backend("put"))?;
            }
            txn.commit().map_err(backend("put"))
        })
        .await
    }

    async fn find_subscribers(&self, topic: &str) -> Result<BTreeSet<ConnectionId>, DirectoryError> {
        let topic = topic.to_string();
        let now = now_millis();
        let conns = self
            .blocking("find_subscribers", move |db| {
                Self::scan_prefix(db, SUBSCRIPTIONS, &topic, now, "find_subscribers")
            })
            .await?;
        Ok(conns.into_iter().map(ConnectionId::from).collect())
    }

    async fn find_topics(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<BTreeSet<String>, DirectoryError> {
        let conn = connection_id.as_str().to_string();
        let now = now_millis();
        self.blocking("find_topics", move |db| {
            Self::scan_prefix(db, BY_CONNECTION, &conn, now, "find_topics")
        })
        .await
    }

    async fn delete(&self, topic: &str, connection_id: &ConnectionId) -> Result<(), DirectoryError> {
        let topic = topic.to_string();
        let conn = connection_id.as_str().to_string();
        self.blocking("delete", move |db| {
            let txn = db.begin_write().map_err(backend("delete"))?;
            {
                let mut forward = txn.open_table(SUBSCRIPTIONS).map_err(backend("delete"))?;
                forward
                    .remove((topic.as_str(), conn.as_str()))
                    .map_err(backend("delete"))?;
                let mut reverse = txn.open_table(BY_CONNECTION).map_err(backend("delete"))?;
                reverse
                    .remove((conn.as_str(), topic.as_str()))
                    .map_err(backend("delete"))?;
            }
            txn.commit().map_err(backend("delete"))
        })
        .await
    }

    async fn purge_expired(&self) -> Result<usize, DirectoryError> {
        let now = now_millis();
        self.blocking("purge_expired", move |db| {
            let txn = db.begin_write().map_err(backend("purge_expired"))?;
            let removed = {
                let mut forward = txn
                    .open_table(SUBSCRIPTIONS)
                    .map_err(backend("purge_expired"))?;
                let mut expired = Vec::new();
                for entry in forward.iter().map_err(backend("purge_expired"))? {
                    let (key, expires_at) = entry.map_err(backend("purge_expired"))?;
                    if expires_at.value() <= now {
                        let (topic, conn) = key.value();
                        expired.push((topic.to_string(), conn.to_string()));
                    }
                }

                let mut reverse = txn
                    .open_table(BY_CONNECTION)
                    .map_err(backend("purge_expired"))?;
                for (topic, conn) in &expired {
                    forward
                        .remove((topic.as_str(), conn.as_str()))
                        .map_err(backend("purge_expired"))?;
                    reverse
                        .remove((conn.as_str(), topic.as_str()))
                        .map_err(backend("purge_expired"))?;
                }
                expired.len()
            };
            txn.commit().map_err(backend("purge_expired"))?;
            Ok(removed)
        })
        .await
    }
}
