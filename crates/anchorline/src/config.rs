//! Pipeline configuration.
//!
//! Loaded once at startup from TOML; every field has a default so an empty
//! file (or no file) is valid.
//!
//! ```toml
//! [channel]
//! capacity = 64
//! receive_timeout_ms = 100
//! endpoint = "127.0.0.1:7402"
//! reconnect_ms = 200
//!
//! [store]
//! endpoint = "127.0.0.1:7401"
//!
//! [ledger]
//! endpoint = "127.0.0.1:7401"
//! require_registered_products = false
//!
//! [rpc]
//! connect_attempts = 3
//! retry_backoff_ms = 200
//! health_check_after_ms = 30000
//!
//! [server]
//! bind = "127.0.0.1:7401"
//! database = "anchorline.db"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use anchorline_rpc::RetryPolicy;
use anchorline_store::LedgerPolicy;

use crate::error::ConfigError;
use crate::tcp::SubscriberOptions;

const DEFAULT_ENDPOINT: &str = "127.0.0.1:7401";
const DEFAULT_CHANNEL_ENDPOINT: &str = "127.0.0.1:7402";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnchorlineConfig {
    pub channel: ChannelConfig,
    pub store: StoreConfig,
    pub ledger: LedgerConfig,
    pub rpc: RpcConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// Per-subscriber buffer, in messages.
    pub capacity: usize,
    /// How long the ingestion loop waits per receive before re-checking its
    /// flag. Bounds stop latency.
    pub receive_timeout_ms: u64,
    /// `host:port` of the networked channel. `anchorline publish` binds it,
    /// `anchorline listen` subscribes to it.
    pub endpoint: String,
    /// Pause before a subscriber redials a lost publisher.
    pub reconnect_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            receive_timeout_ms: 100,
            endpoint: DEFAULT_CHANNEL_ENDPOINT.to_string(),
            reconnect_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// `host:port` of the content store node.
    pub endpoint: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// `host:port` of the ledger node.
    pub endpoint: String,
    /// Served ledgers reject anchors for unregistered products.
    pub require_registered_products: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            require_registered_products: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RpcConfig {
    pub connect_attempts: u32,
    pub retry_backoff_ms: u64,
    pub health_check_after_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            connect_attempts: policy.connect_attempts,
            retry_backoff_ms: policy.backoff.as_millis() as u64,
            health_check_after_ms: policy.health_check_after.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address `anchorline serve` listens on.
    pub bind: String,
    /// SQLite file backing both the served store and ledger.
    pub database: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_ENDPOINT.to_string(),
            database: PathBuf::from("anchorline.db"),
        }
    }
}

impl AnchorlineConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel.capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "channel.capacity",
                reason: "must be at least 1".into(),
            });
        }
        if self.channel.receive_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "channel.receive_timeout_ms",
                reason: "must be at least 1".into(),
            });
        }
        for (key, endpoint) in [
            ("channel.endpoint", &self.channel.endpoint),
            ("store.endpoint", &self.store.endpoint),
            ("ledger.endpoint", &self.ledger.endpoint),
            ("server.bind", &self.server.bind),
        ] {
            if endpoint.is_empty() {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must not be empty".into(),
                });
            }
        }
        Ok(())
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.channel.receive_timeout_ms)
    }

    /// Subscriber settings for the networked channel.
    pub fn subscriber_options(&self) -> SubscriberOptions {
        SubscriberOptions {
            capacity: self.channel.capacity,
            reconnect_delay: Some(Duration::from_millis(self.channel.reconnect_ms)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            connect_attempts: self.rpc.connect_attempts,
            backoff: Duration::from_millis(self.rpc.retry_backoff_ms),
            health_check_after: Duration::from_millis(self.rpc.health_check_after_ms),
        }
    }

    pub fn ledger_policy(&self) -> LedgerPolicy {
        LedgerPolicy {
            require_registered_products: self.ledger.require_registered_products,
        }
    }
}
