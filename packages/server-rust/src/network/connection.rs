//! Open persistent connections, keyed by [`ConnectionId`].
//!
//! Each connection owns a bounded queue drained by its WebSocket write
//! loop. The registry doubles as the server's [`PushGateway`]: fanout
//! addresses a connection by id and the frame lands on that queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use topicast_core::{ConnectionId, PushPayload};
use uuid::Uuid;

use super::config::ConnectionConfig;
use crate::error::DeliveryError;
use crate::traits::PushGateway;

/// Frame queued for a connection's write loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    /// Close with the given reason; the write loop stops after sending it.
    Close(Option<String>),
}

#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    queue: mpsc::Sender<OutboundMessage>,
    opened_at: Instant,
}

impl ConnectionHandle {
    /// Queues `text`, waiting up to `wait` for room.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::Timeout`] if the queue stays full,
    /// [`DeliveryError::Gone`] once the write loop has exited.
    pub async fn deliver(&self, text: String, wait: Duration) -> Result<(), DeliveryError> {
        match tokio::time::timeout(wait, self.queue.send(OutboundMessage::Text(text))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DeliveryError::Gone(self.id.clone())),
            Err(_) => Err(DeliveryError::Timeout(self.id.clone())),
        }
    }

    /// Asks the write loop to close. Returns false if the queue was full or
    /// already closed, in which case the loop ends when the handle drops.
    pub fn close(&self, reason: &str) -> bool {
        self.queue
            .try_send(OutboundMessage::Close(Some(reason.to_string())))
            .is_ok()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.queue.is_closed()
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    config: ConnectionConfig,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            connections: DashMap::new(),
            config,
        }
    }

    /// Adds a connection under a fresh v4 id. The receiver feeds the
    /// connection's write loop.
    pub fn register(&self) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
        let (queue, rx) = mpsc::channel(self.config.outbound_channel_capacity);
        let handle = Arc::new(ConnectionHandle {
            id: ConnectionId::new(Uuid::new_v4().to_string()),
            queue,
            opened_at: Instant::now(),
        });
        self.connections.insert(handle.id.clone(), Arc::clone(&handle));
        (handle, rx)
    }

    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.remove(id).map(|(_, handle)| handle)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Empties the registry, handing back every connection it held.
    pub fn take_all(&self) -> Vec<Arc<ConnectionHandle>> {
        let mut taken = Vec::with_capacity(self.connections.len());
        self.connections.retain(|_, handle| {
            taken.push(Arc::clone(handle));
            false
        });
        taken
    }
}

#[async_trait]
impl PushGateway for ConnectionRegistry {
    /// Delivers `{"data": payload}` to one connection.
    async fn push(&self, connection_id: &ConnectionId, payload: String) -> Result<(), DeliveryError> {
        let Some(handle) = self.get(connection_id) else {
            return Err(DeliveryError::Gone(connection_id.clone()));
        };
        let frame = serde_json::to_string(&PushPayload { data: payload }).map_err(|err| {
            DeliveryError::Transport {
                connection_id: connection_id.clone(),
                message: err.to_string(),
            }
        })?;
        handle.deliver(frame, self.config.send_timeout).await
    }
}
