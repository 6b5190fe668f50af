//! Process assembly: builds the directory, relay, pipeline and network
//! module from configuration and runs them until shutdown.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use topicast_core::{EventKind, OperationSchema};
use tracing::{info, info_span, Instrument};

use crate::directory::MemoryDirectory;
use crate::network::{NetworkConfig, NetworkModule, ShutdownController};
use crate::service::middleware::build_operation_pipeline;
use crate::service::{
    BackgroundWorker, DirectorySweeper, EventRelay, HttpTransformer, NotificationFanout,
    OperationClassifier, OperationExecutor, OperationIngress, OperationRouter,
    PassthroughTransformer, Publisher, ServerConfig, SubscriptionManager, TransformWorker,
    WorkDispatcher,
};
use crate::traits::{ConnectionDirectory, PushGateway, Transformer};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Where subscription records live.
#[derive(Debug, Clone, Default)]
pub enum DirectoryBackend {
    #[default]
    Memory,
    /// Durable `redb` file at the given path.
    Redb(PathBuf),
}

/// Transform workers registered on request envelopes.
#[derive(Debug, Clone)]
pub struct TransformConfig {
    /// Translation service root; `None` selects the pass-through transformer.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// One worker per variant.
    pub variants: Vec<String>,
    pub timeout: Duration,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            variants: vec!["fr".to_string(), "de".to_string()],
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub network: NetworkConfig,
    pub directory: DirectoryBackend,
    pub transform: TransformConfig,
}

// ---------------------------------------------------------------------------
// Topicast
// ---------------------------------------------------------------------------

/// A fully wired server with its listener already bound.
pub struct Topicast {
    node_id: String,
    port: u16,
    network: NetworkModule,
    relay: EventRelay,
    sweeper: BackgroundWorker<DirectorySweeper>,
    directory: Arc<dyn ConnectionDirectory>,
}

impl Topicast {
    /// Builds every component and binds the listener. Must run inside a
    /// tokio runtime: relay consumers and the sweeper are spawned here.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be opened, the transformer client cannot
    /// be built, the schema does not parse, or the address cannot be bound.
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let AppConfig {
            server,
            network: network_config,
            directory: backend,
            transform,
        } = config;

        let directory = open_directory(&backend)?;

        let mut network = NetworkModule::new(network_config);
        let port = network.start().await?;
        let push: Arc<dyn PushGateway> = network.registry();

        let transformer = build_transformer(&transform)?;
        let mut relay = EventRelay::builder(server.relay_queue_capacity).subscribe(
            EventKind::Response,
            Arc::new(NotificationFanout::new(Arc::clone(&directory), push)),
        );
        for variant in &transform.variants {
            relay = relay.subscribe(
                EventKind::Request,
                Arc::new(TransformWorker::new(variant.clone(), Arc::clone(&transformer))),
            );
        }
        let relay = relay.build();

        let executor = OperationExecutor::new(WorkDispatcher::new(relay.publisher()));
        let subscriptions =
            SubscriptionManager::new(Arc::clone(&directory), server.subscription_ttl);
        let router = OperationRouter::new(executor, subscriptions.clone());
        let pipeline = build_operation_pipeline(router, &server);

        let schema = OperationSchema::chat().context("failed to load operation schema")?;
        let classifier = Arc::new(OperationClassifier::new(Arc::new(schema)));
        network.attach(OperationIngress::new(classifier, pipeline), subscriptions);

        let sweeper = BackgroundWorker::start(
            DirectorySweeper::new(Arc::clone(&directory)),
            Duration::from_millis(server.sweep_interval_ms),
        );

        info!(
            node_id = %server.node_id,
            port,
            variants = ?transform.variants,
            "topicast assembled"
        );

        Ok(Self {
            node_id: server.node_id,
            port,
            network,
            relay,
            sweeper,
            directory,
        })
    }

    /// Port the listener is bound to.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn directory(&self) -> Arc<dyn ConnectionDirectory> {
        Arc::clone(&self.directory)
    }

    /// Publishes straight onto the relay, bypassing the operation pipeline.
    #[must_use]
    pub fn publisher(&self) -> Publisher {
        self.relay.publisher()
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        self.network.shutdown_controller()
    }

    /// Serves until `shutdown` resolves, then drains connections, stops the
    /// relay and the sweeper.
    ///
    /// # Errors
    ///
    /// Propagates fatal server errors.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let Self {
            node_id,
            network,
            relay,
            mut sweeper,
            ..
        } = self;
        let span = info_span!("topicast", node_id = %node_id);

        async move {
            let served = network.serve(shutdown).await;
            relay.shutdown().await;
            sweeper.stop().await;
            info!("topicast stopped");
            served
        }
        .instrument(span)
        .await
    }
}

fn open_directory(backend: &DirectoryBackend) -> anyhow::Result<Arc<dyn ConnectionDirectory>> {
    match backend {
        DirectoryBackend::Memory => Ok(Arc::new(MemoryDirectory::new())),
        #[cfg(feature = "redb")]
        DirectoryBackend::Redb(path) => {
            let directory = crate::directory::RedbDirectory::open(path)
                .with_context(|| format!("failed to open directory at {}", path.display()))?;
            Ok(Arc::new(directory))
        }
        #[cfg(not(feature = "redb"))]
        DirectoryBackend::Redb(path) => anyhow::bail!(
            "directory file {} requested but the `redb` feature is disabled",
            path.display()
        ),
    }
}

fn build_transformer(config: &TransformConfig) -> anyhow::Result<Arc<dyn Transformer>> {
    match &config.endpoint {
        Some(endpoint) => {
            let transformer = HttpTransformer::new(endpoint, config.api_key.clone(), config.timeout)
                .context("failed to build transform client")?;
            Ok(Arc::new(transformer))
        }
        None => Ok(Arc::new(PassthroughTransformer)),
    }
}
