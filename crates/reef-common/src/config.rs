//! Gateway configuration.
//!
//! Loaded from a TOML file, with every section carrying sensible defaults
//! so a bare config file is enough for development.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Root configuration for the reef gateway
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration
    pub network: NetworkConfig,
    /// Placement ring configuration
    pub ring: RingConfig,
    /// Storage tier configuration
    pub storage: StorageConfig,
    /// Request limits
    pub limits: LimitsConfig,
    /// Admission throttle
    pub throttle: ThrottleConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| crate::Error::internal(format!("read config: {e}")))?;
        toml::from_str(&text).map_err(|e| crate::Error::internal(format!("parse config: {e}")))
    }
}

/// Listener addresses
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the HTTP API listens on
    pub listen: SocketAddr,
    /// Address the Prometheus scrape endpoint listens on
    pub metrics_listen: SocketAddr,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".parse().unwrap(),
            metrics_listen: "0.0.0.0:8881".parse().unwrap(),
        }
    }
}

/// Placement ring configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// URL of the placement-data service snapshot document
    pub placement_url: String,
    /// Seconds between ring refresh polls
    pub poll_interval_secs: u64,
}

impl RingConfig {
    /// Refresh poll interval
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            placement_url: "http://placement.reef.local/ring".to_string(),
            poll_interval_secs: 1800,
        }
    }
}

/// Storage tier configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Port storage nodes listen on
    pub port: u16,
    /// Milliseconds to wait when probing a candidate node before a write
    pub probe_timeout_ms: u64,
    /// Milliseconds to wait establishing a connection
    pub connect_timeout_ms: u64,
    /// Connection-time retries performed by the HTTP agent; never applies
    /// once the body has started streaming
    pub connect_retries: u32,
}

impl StorageConfig {
    /// Candidate probe timeout
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Connection establishment timeout
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            probe_timeout_ms: 2_000,
            connect_timeout_ms: 4_000,
            connect_retries: 2,
        }
    }
}

/// Request limits
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted object body in bytes
    pub max_object_size: u64,
    /// Most copies a client may request via `Durability-Level`
    pub max_object_copies: usize,
    /// Copies written when the client does not ask for a level
    pub default_durability: usize,
    /// Seconds a socket may sit idle before the request is aborted
    pub socket_timeout_secs: u64,
    /// Seconds an upload may go without a byte before it is abandoned
    pub upload_idle_timeout_secs: u64,
    /// Total bytes allowed across `m-*` user metadata headers
    pub max_user_metadata_bytes: usize,
}

impl LimitsConfig {
    /// Socket idle timeout
    #[must_use]
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }

    /// Upload idle timeout
    #[must_use]
    pub fn upload_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_idle_timeout_secs)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_object_size: 5 * 1024 * 1024 * 1024, // 5 GiB
            max_object_copies: 9,
            default_durability: 2,
            socket_timeout_secs: 120,
            upload_idle_timeout_secs: 45,
            max_user_metadata_bytes: 4 * 1024,
        }
    }
}

/// Admission throttle configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Concurrent requests admitted
    pub concurrency: usize,
    /// Requests allowed to wait for a slot before rejection
    pub queue_limit: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            concurrency: 50,
            queue_limit: 250,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.ring.poll_interval_secs, 1800);
        assert_eq!(config.limits.default_durability, 2);
        assert_eq!(config.limits.socket_timeout_secs, 120);
        assert_eq!(config.limits.upload_idle_timeout_secs, 45);
        assert_eq!(config.network.listen.port(), 8080);
    }

    #[test]
    fn test_partial_toml() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [limits]
            max_object_copies = 6

            [throttle]
            concurrency = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.limits.max_object_copies, 6);
        assert_eq!(config.throttle.concurrency, 10);
        // Untouched sections keep their defaults
        assert_eq!(config.ring.poll_interval_secs, 1800);
    }
}
