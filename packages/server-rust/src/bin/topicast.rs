//! `topicast` server binary: parses flags, installs logging and metrics,
//! and serves until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use topicast_server::network::{ConnectionConfig, NetworkConfig, TlsConfig};
use topicast_server::service::ServerConfig;
use topicast_server::{AppConfig, DirectoryBackend, Topicast, TransformConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Topic subscription and notification fanout server.
#[derive(Parser, Debug)]
#[command(name = "topicast", version, about)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "TOPICAST_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, env = "TOPICAST_PORT", default_value_t = 8080)]
    port: u16,

    /// PEM certificate; enables TLS together with `--tls-key`.
    #[arg(long, env = "TOPICAST_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key.
    #[arg(long, env = "TOPICAST_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Allowed CORS origins, comma separated.
    #[arg(long, env = "TOPICAST_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    /// `memory`, or the path of a durable directory file.
    #[arg(long, env = "TOPICAST_DIRECTORY", default_value = "memory", value_parser = parse_directory)]
    directory: DirectoryBackend,

    /// Node identifier attached to logs; generated when absent.
    #[arg(long, env = "TOPICAST_NODE_ID")]
    node_id: Option<String>,

    /// Subscription lifetime in seconds.
    #[arg(long, env = "TOPICAST_SUBSCRIPTION_TTL_SECS", default_value_t = 3600)]
    subscription_ttl_secs: u64,

    /// Operations processed concurrently before load is shed.
    #[arg(long, env = "TOPICAST_MAX_CONCURRENT_OPERATIONS", default_value_t = 1000)]
    max_concurrent_operations: u32,

    /// Interval between expired-record sweeps in milliseconds.
    #[arg(long, env = "TOPICAST_SWEEP_INTERVAL_MS", default_value_t = 60_000)]
    sweep_interval_ms: u64,

    /// Per-handler relay queue capacity.
    #[arg(long, env = "TOPICAST_RELAY_QUEUE_CAPACITY", default_value_t = 1024)]
    relay_queue_capacity: usize,

    /// Seconds to wait on a full connection queue before a push fails.
    #[arg(long, env = "TOPICAST_SEND_TIMEOUT_SECS", default_value_t = 5)]
    send_timeout_secs: u64,

    /// Seconds between keepalive pings on each persistent connection.
    #[arg(long, env = "TOPICAST_PING_INTERVAL_SECS", default_value_t = 30)]
    ping_interval_secs: u64,

    /// Translation service root; messages pass through unchanged when absent.
    #[arg(long, env = "TOPICAST_TRANSFORM_ENDPOINT")]
    transform_endpoint: Option<String>,

    #[arg(long, env = "TOPICAST_TRANSFORM_API_KEY", hide_env_values = true)]
    transform_api_key: Option<String>,

    /// Target variants, one transform worker each.
    #[arg(long, env = "TOPICAST_TRANSFORM_VARIANTS", value_delimiter = ',', default_value = "fr,de")]
    transform_variants: Vec<String>,

    /// Prometheus scrape listener, e.g. `0.0.0.0:9000`.
    #[arg(long, env = "TOPICAST_PROMETHEUS_ADDR")]
    prometheus_addr: Option<SocketAddr>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "TOPICAST_LOG_JSON")]
    log_json: bool,
}

fn parse_directory(value: &str) -> Result<DirectoryBackend, String> {
    match value {
        "" => Err("directory must be `memory` or a file path".to_string()),
        "memory" => Ok(DirectoryBackend::Memory),
        path => Ok(DirectoryBackend::Redb(PathBuf::from(path))),
    }
}

impl Cli {
    fn into_config(self) -> AppConfig {
        let tls = match (self.tls_cert, self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path,
                key_path,
            }),
            _ => None,
        };

        AppConfig {
            server: ServerConfig {
                node_id: self
                    .node_id
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                subscription_ttl: Duration::from_secs(self.subscription_ttl_secs),
                max_concurrent_operations: self.max_concurrent_operations,
                sweep_interval_ms: self.sweep_interval_ms,
                relay_queue_capacity: self.relay_queue_capacity,
            },
            network: NetworkConfig {
                host: self.host,
                port: self.port,
                tls,
                connection: ConnectionConfig {
                    send_timeout: Duration::from_secs(self.send_timeout_secs),
                    ping_interval: Duration::from_secs(self.ping_interval_secs),
                    ..ConnectionConfig::default()
                },
                cors_origins: self.cors_origins,
                ..NetworkConfig::default()
            },
            directory: self.directory,
            transform: TransformConfig {
                endpoint: self.transform_endpoint,
                api_key: self.transform_api_key,
                variants: self.transform_variants,
                ..TransformConfig::default()
            },
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    // A second init is a no-op.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    if let Some(addr) = cli.prometheus_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install prometheus exporter")?;
        info!(%addr, "prometheus exporter listening");
    }

    let app = Topicast::build(cli.into_config()).await?;
    info!(port = app.port(), "topicast listening");

    app.run(async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to listen for ctrl-c; shutting down");
        }
        info!("shutdown signal received");
    })
    .await
}
