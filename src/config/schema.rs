//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the broker.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the broker.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BrokerConfig {
    /// Root listener and protocol sniffing.
    pub listener: ListenerConfig,

    /// Per-connection processing limits.
    pub connection: ConnectionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:9090").
    pub bind_address: String,

    /// Deadline, in milliseconds from accept, for sniff reads. A matcher
    /// still waiting on input at the deadline declines. Zero disables it.
    pub read_timeout_ms: u64,

    /// Capacity of each protocol's delivery queue.
    pub queue_capacity: usize,

    /// Maximum number of bytes a matcher may inspect.
    pub max_sniff_bytes: usize,

    /// Base delay before retrying after a temporary accept error.
    pub accept_backoff_base_ms: u64,

    /// Upper bound for the accept retry delay.
    pub accept_backoff_max_ms: u64,
}

impl ListenerConfig {
    /// Sniff deadline, if any.
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9090".to_string(),
            read_timeout_ms: 120_000,
            queue_capacity: 1024,
            max_sniff_bytes: 4096,
            accept_backoff_base_ms: 5,
            accept_backoff_max_ms: 1000,
        }
    }
}

/// Connection processing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Inactivity window after which a silent connection is closed.
    pub inactivity_secs: u64,

    /// Largest frame accepted from or sent to a client.
    pub max_frame_bytes: usize,

    /// Outbound frames buffered per connection before sends are dropped.
    pub outbox_capacity: usize,
}

impl ConnectionConfig {
    /// Inactivity window as a duration.
    pub fn inactivity(&self) -> Duration {
        Duration::from_secs(self.inactivity_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            inactivity_secs: 120,
            max_frame_bytes: 64 * 1024,
            outbox_capacity: 256,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9091".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: BrokerConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:7000"
            read_timeout_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:7000");
        assert_eq!(config.listener.read_timeout(), None);
        assert_eq!(config.listener.queue_capacity, 1024);
        assert_eq!(config.connection.inactivity(), Duration::from_secs(120));
        assert_eq!(config.observability.log_level, "info");
    }
}
