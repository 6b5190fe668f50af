//! In-memory [`ConnectionDirectory`] keeping both indexes under one lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use topicast_core::{now_millis, ConnectionId, ConnectionRecord};
use tracing::debug;

use super::expiry_after;
use crate::error::DirectoryError;
use crate::traits::ConnectionDirectory;

type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Forward and reverse maps. Every `(topic, connection, expiry)` triple is
/// present in both or in neither.
#[derive(Debug, Default)]
struct Index {
    by_topic: HashMap<String, HashMap<ConnectionId, u64>>,
    by_connection: HashMap<ConnectionId, HashMap<String, u64>>,
}

impl Index {
    fn insert(&mut self, topic: &str, connection_id: &ConnectionId, expires_at: u64) {
        self.by_topic
            .entry(topic.to_string())
            .or_default()
            .insert(connection_id.clone(), expires_at);
        self.by_connection
            .entry(connection_id.clone())
            .or_default()
            .insert(topic.to_string(), expires_at);
    }

    /// Returns whether the pair was stored.
    fn remove(&mut self, topic: &str, connection_id: &ConnectionId) -> bool {
        let mut removed = false;
        if let Some(conns) = self.by_topic.get_mut(topic) {
            removed = conns.remove(connection_id).is_some();
            if conns.is_empty() {
                self.by_topic.remove(topic);
            }
        }
        if let Some(topics) = self.by_connection.get_mut(connection_id) {
            topics.remove(topic);
            if topics.is_empty() {
                self.by_connection.remove(connection_id);
            }
        }
        removed
    }
}

/// Directory held entirely in process memory.
///
/// A single `RwLock` guards both indexes so a reader never observes one
/// side of a put or delete without the other. Reads take the shared lock;
/// writes are O(1) per pair.
pub struct MemoryDirectory {
    index: RwLock<Index>,
    clock: Clock,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(now_millis))
    }

    /// Creates a directory reading time from `clock` (milliseconds since epoch).
    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            clock,
        }
    }

    /// Number of physically stored records, expired ones included.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.index.read().by_topic.values().map(HashMap::len).sum()
    }

    /// Point-in-time copy of every stored record.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionRecord> {
        let index = self.index.read();
        index
            .by_topic
            .iter()
            .flat_map(|(topic, conns)| {
                conns.iter().map(|(conn, expires_at)| ConnectionRecord {
                    topic: topic.clone(),
                    connection_id: conn.clone(),
                    expires_at: *expires_at,
                })
            })
            .collect()
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionDirectory for MemoryDirectory {
    async fn put(
        &self,
        topic: &str,
        connection_id: &ConnectionId,
        ttl: Duration,
    ) -> Result<(), DirectoryError> {
        let expires_at = expiry_after((self.clock)(), ttl);
        self.index.write().insert(topic, connection_id, expires_at);
        Ok(())
    }

    async fn find_subscribers(&self, topic: &str) -> Result<BTreeSet<ConnectionId>, DirectoryError> {
        let now = (self.clock)();
        let index = self.index.read();
        Ok(index
            .by_topic
            .get(topic)
            .map(|conns| {
                conns
                    .iter()
                    .filter(|(_, expires_at)| **expires_at > now)
                    .map(|(conn, _)| conn.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_topics(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<BTreeSet<String>, DirectoryError> {
        let now = (self.clock)();
        let index = self.index.read();
        Ok(index
            .by_connection
            .get(connection_id)
            .map(|topics| {
                topics
                    .iter()
                    .filter(|(_, expires_at)| **expires_at > now)
                    .map(|(topic, _)| topic.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, topic: &str, connection_id: &ConnectionId) -> Result<(), DirectoryError> {
        if !self.index.write().remove(topic, connection_id) {
            debug!(%topic, connection = %connection_id, "delete of absent record");
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, DirectoryError> {
        let now = (self.clock)();
        let mut index = self.index.write();
        let expired: Vec<(String, ConnectionId)> = index
            .by_topic
            .iter()
            .flat_map(|(topic, conns)| {
                conns
                    .iter()
                    .filter(|(_, expires_at)| **expires_at <= now)
                    .map(|(conn, _)| (topic.clone(), conn.clone()))
            })
            .collect();

        Ok(expired
            .iter()
            .filter(|(topic, conn)| index.remove(topic, conn))
            .count())
    }
}
