//! Axum handlers for `/graphql`, `/ws` and `/health`.

pub mod graphql;
pub mod health;
pub mod websocket;

pub use graphql::graphql_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use websocket::ws_upgrade_handler;

use std::sync::Arc;
use std::time::Instant;

use super::{ConnectionRegistry, NetworkConfig, ShutdownController};
use crate::service::{OperationIngress, SubscriptionManager};

/// Handler state; cloned per request, so every field is a handle.
#[derive(Clone)]
pub struct AppState {
    /// Open persistent connections.
    pub registry: Arc<ConnectionRegistry>,
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Entry point both channels submit operations to.
    pub ingress: OperationIngress,
    /// Used for explicit unsubscribe and disconnect teardown.
    pub subscriptions: SubscriptionManager,
    pub start_time: Instant,
}
