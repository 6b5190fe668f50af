use std::time::Duration;

/// Server-level configuration for the operation pipeline and relay.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Unique identifier for this server node, attached to log spans.
    pub node_id: String,
    /// Lifetime of a subscription record from the moment it is written.
    pub subscription_ttl: Duration,
    /// Maximum number of concurrent operations before load shedding.
    pub max_concurrent_operations: u32,
    /// Interval between expired-record sweeps in milliseconds.
    pub sweep_interval_ms: u64,
    /// Per-handler queue capacity inside the event relay.
    pub relay_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            subscription_ttl: Duration::from_secs(60 * 60),
            max_concurrent_operations: 1000,
            sweep_interval_ms: 60_000,
            relay_queue_capacity: 1024,
        }
    }
}
