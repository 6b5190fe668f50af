//! Listener, TLS and per-connection settings.

use std::path::PathBuf;
use std::time::Duration;

/// Everything the network module needs before it can bind.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub host: String,
    /// 0 lets the OS pick; [`super::NetworkModule::start`] reports the result.
    pub port: u16,
    /// Serve over rustls when set.
    pub tls: Option<TlsConfig>,
    pub connection: ConnectionConfig,
    /// `"*"` allows any origin.
    pub cors_origins: Vec<String>,
    /// Upper bound on a one-shot `/graphql` request.
    pub request_timeout: Duration,
    /// Larger one-shot bodies are refused with 413.
    pub max_body_bytes: usize,
}

impl NetworkConfig {
    /// `host:port` as passed to the listener.
    #[must_use]
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            tls: None,
            connection: ConnectionConfig::default(),
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 64 * 1024,
        }
    }
}

/// PEM files loaded at startup.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Settings applied to every persistent connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Frames (replies and pushes) queued per connection before pushes wait.
    pub outbound_channel_capacity: usize,
    /// How long a push waits on a full queue before it counts as failed.
    pub send_timeout: Duration,
    /// Silence after which the server closes the connection. Pong replies
    /// count, so a live push-only subscriber stays open.
    pub idle_timeout: Duration,
    /// How often the server pings each connection.
    pub ping_interval: Duration,
    pub ws_write_buffer_size: usize,
    pub ws_max_write_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_channel_capacity: 256,
            send_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(10 * 60),
            ping_interval: Duration::from_secs(30),
            ws_write_buffer_size: 128 * 1024,
            ws_max_write_buffer_size: 512 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_listen_everywhere_on_an_ephemeral_port() {
        let config = NetworkConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:0");
        assert!(config.tls.is_none());
        assert_eq!(config.cors_origins, vec!["*"]);
        assert_eq!(config.max_body_bytes, 65_536);
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let config = NetworkConfig {
            host: "::1".to_string(),
            port: 8080,
            ..NetworkConfig::default()
        };
        assert_eq!(config.bind_address(), "[::1]:8080");
    }

    #[test]
    fn idle_connections_last_ten_minutes() {
        let config = ConnectionConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert_eq!(config.send_timeout, Duration::from_secs(5));
        assert!(config.ping_interval < config.idle_timeout);
        assert!(config.ws_max_write_buffer_size > config.ws_write_buffer_size);
    }
}
