//! Node configuration
//!
//! Every section has working defaults; a config file only needs the keys it
//! changes. Durations are stored as milliseconds so the TOML stays flat.

use crate::retry::RetryConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default per-attempt timeout for gossip sends
pub const DEFAULT_GOSSIP_TIMEOUT_MS: u64 = 5_000;

/// Default per-attempt timeout for key/value store requests
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 500;

/// Default batch flush tick
pub const DEFAULT_FLUSH_TICK_MS: u64 = 200;

/// Default counter heartbeat period
pub const DEFAULT_HEARTBEAT_MS: u64 = 1_000;

/// Full node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Gossip sender settings
    pub gossip: GossipConfig,
    /// Batching broadcaster settings
    pub batch: BatchConfig,
    /// Counter reconciler settings
    pub counter: CounterConfig,
}

impl NodeConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.gossip.rpc_timeout_ms == 0 {
            return Err(Error::config("gossip.rpc_timeout_ms must be at least 1"));
        }
        if self.gossip.max_in_flight_per_peer == 0 {
            return Err(Error::config(
                "gossip.max_in_flight_per_peer must be at least 1",
            ));
        }
        self.gossip.retry.validate()?;

        if self.batch.tick_ms == 0 {
            return Err(Error::config("batch.tick_ms must be at least 1"));
        }

        if self.counter.key.is_empty() {
            return Err(Error::config("counter.key must not be empty"));
        }
        if self.counter.store.is_empty() {
            return Err(Error::config("counter.store must not be empty"));
        }
        if self.counter.rpc_timeout_ms == 0 {
            return Err(Error::config("counter.rpc_timeout_ms must be at least 1"));
        }
        if self.counter.heartbeat_ms == 0 {
            return Err(Error::config("counter.heartbeat_ms must be at least 1"));
        }

        Ok(())
    }
}

/// Gossip sender configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Per-attempt request timeout
    pub rpc_timeout_ms: u64,
    /// Concurrent sends allowed towards a single peer
    pub max_in_flight_per_peer: usize,
    /// Backoff between attempts
    pub retry: RetryConfig,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: DEFAULT_GOSSIP_TIMEOUT_MS,
            max_in_flight_per_peer: 4,
            retry: RetryConfig::gossip(),
        }
    }
}

impl GossipConfig {
    /// Per-attempt request timeout
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// Batching broadcaster configuration
///
/// A batch flushes on the first tick where it holds at least `min_batch`
/// values, or where `debounce_ms` has passed since the previous flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Batch client broadcasts instead of flooding them
    pub enabled: bool,
    /// How often the flush policy is evaluated
    pub tick_ms: u64,
    /// Batch size that flushes without waiting for the debounce window
    pub min_batch: usize,
    /// Longest a small batch waits before flushing anyway
    pub debounce_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_ms: DEFAULT_FLUSH_TICK_MS,
            min_batch: 4,
            debounce_ms: 1_500,
        }
    }
}

impl BatchConfig {
    /// Flush evaluation period
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Debounce window
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Counter reconciler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    /// Node id of the key/value service (`seq-kv`, `lin-kv`)
    pub store: String,
    /// Key holding the global counter
    pub key: String,
    /// Per-request store timeout
    pub rpc_timeout_ms: u64,
    /// Reconciliation heartbeat period
    pub heartbeat_ms: u64,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            store: "seq-kv".to_string(),
            key: "counter".to_string(),
            rpc_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            heartbeat_ms: DEFAULT_HEARTBEAT_MS,
        }
    }
}

impl CounterConfig {
    /// Per-request store timeout
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Heartbeat period
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
}
