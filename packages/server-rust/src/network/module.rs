//! HTTP/WebSocket front end.
//!
//! The module is built in steps: [`NetworkModule::new`] creates the registry
//! (fanout needs it as its push gateway before anything else exists),
//! [`NetworkModule::start`] binds, [`NetworkModule::attach`] takes the
//! operation services, and [`NetworkModule::serve`] runs until shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context as _};
use axum::routing::{get, post};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use futures_util::future::join_all;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::{NetworkConfig, TlsConfig};
use super::connection::ConnectionRegistry;
use super::handlers::websocket::disconnect;
use super::handlers::{
    graphql_handler, health_handler, liveness_handler, readiness_handler, ws_upgrade_handler,
    AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::service::{OperationIngress, SubscriptionManager};

/// Longest wait for in-flight operations once connections are closed.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
/// Grace given to open TLS sessions after the drain finishes.
const TLS_CLOSE_GRACE: Duration = Duration::from_secs(5);

fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
}

/// `/ws` is the persistent channel, `/graphql` the one-shot channel; the
/// `/health` routes report [`super::HealthState`].
pub fn build_router(state: AppState) -> Router {
    let layers = build_http_layers(&state.config);
    health_routes()
        .route("/ws", get(ws_upgrade_handler))
        .route("/graphql", post(graphql_handler))
        .layer(layers)
        .with_state(state)
}

pub struct NetworkModule {
    config: NetworkConfig,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownController>,
    listener: Option<TcpListener>,
    ingress: Option<OperationIngress>,
    subscriptions: Option<SubscriptionManager>,
}

impl NetworkModule {
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new(config.connection.clone())),
            shutdown: Arc::new(ShutdownController::new()),
            config,
            listener: None,
            ingress: None,
            subscriptions: None,
        }
    }

    /// Open connections; also the push gateway used by fanout.
    #[must_use]
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    pub fn attach(&mut self, ingress: OperationIngress, subscriptions: SubscriptionManager) {
        self.ingress = Some(ingress);
        self.subscriptions = Some(subscriptions);
    }

    /// Binds the listener and returns the port actually bound.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = self.config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let local = listener.local_addr()?;
        info!(%local, tls = self.config.tls.is_some(), "listener bound");

        self.listener = Some(listener);
        Ok(local.port())
    }

    /// Accepts connections until `shutdown` resolves, then drains: health
    /// goes to `Draining`, every persistent connection is closed and its
    /// subscriptions removed, in-flight operations are awaited, and health
    /// ends at `Stopped`.
    ///
    /// # Errors
    ///
    /// Fails if `start()` or `attach()` was skipped, or on a fatal I/O error.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let listener = self
            .listener
            .ok_or_else(|| anyhow!("start() must be called before serve()"))?;
        let (Some(ingress), Some(subscriptions)) = (self.ingress, self.subscriptions) else {
            return Err(anyhow!("attach() must be called before serve()"));
        };

        let state = AppState {
            registry: self.registry,
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config),
            ingress,
            subscriptions,
            start_time: Instant::now(),
        };
        let router = build_router(state.clone());
        let tls = state.config.tls.clone();
        let drained = async move {
            shutdown.await;
            drain(&state).await;
        };

        self.shutdown.set_ready();
        match tls {
            None => {
                axum::serve(listener, router)
                    .with_graceful_shutdown(drained)
                    .await?;
                Ok(())
            }
            Some(tls) => serve_tls(listener, router, &tls, drained).await,
        }
    }
}

/// `axum-server` with rustls, taking over the listener bound in `start()`.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: &TlsConfig,
    drained: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let rustls = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .with_context(|| format!("failed to load TLS material from {}", tls.cert_path.display()))?;

    let handle = axum_server::Handle::new();
    let closer = handle.clone();
    tokio::spawn(async move {
        drained.await;
        closer.graceful_shutdown(Some(TLS_CLOSE_GRACE));
    });

    axum_server::from_tcp_rustls(listener.into_std()?, rustls)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}

async fn drain(state: &AppState) {
    state.shutdown.trigger_shutdown();

    let open = state.registry.take_all();
    if !open.is_empty() {
        info!(connections = open.len(), "closing persistent connections");
        for handle in &open {
            handle.close("server shutting down");
        }
        join_all(open.iter().map(|handle| disconnect(state, &handle.id))).await;
    }

    if state.shutdown.wait_for_drain(DRAIN_TIMEOUT).await {
        info!("drain complete");
    } else {
        warn!(
            in_flight = state.shutdown.in_flight_count(),
            "drain timed out with operations still running"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::connection::OutboundMessage;
    use crate::network::handlers::health::tests::test_state;
    use crate::network::HealthState;

    fn loopback() -> NetworkConfig {
        NetworkConfig {
            host: "127.0.0.1".into(),
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn registry_is_shared_with_callers() {
        let module = NetworkModule::new(NetworkConfig::default());
        assert!(Arc::ptr_eq(&module.registry(), &module.registry()));
    }

    #[tokio::test]
    async fn start_reports_the_bound_port() {
        let mut module = NetworkModule::new(loopback());
        assert_ne!(module.start().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn serve_requires_start_then_attach() {
        let unbound = NetworkModule::new(loopback());
        let err = unbound.serve(std::future::pending::<()>()).await.unwrap_err();
        assert!(err.to_string().contains("start()"));

        let mut unattached = NetworkModule::new(loopback());
        unattached.start().await.unwrap();
        let err = unattached.serve(std::future::pending::<()>()).await.unwrap_err();
        assert!(err.to_string().contains("attach()"));
    }

    #[tokio::test]
    async fn drain_closes_connections_and_removes_their_subscriptions() {
        let state = test_state();
        state.shutdown.set_ready();
        let (handle, mut rx) = state.registry.register();
        state.subscriptions.on_subscribe("room1", &handle.id).await.unwrap();

        drain(&state).await;

        assert_eq!(state.registry.count(), 0);
        assert!(matches!(rx.recv().await, Some(OutboundMessage::Close(_))));
        let report = state.subscriptions.on_disconnect(&handle.id).await.unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(state.shutdown.health_state(), HealthState::Stopped);
    }
}
