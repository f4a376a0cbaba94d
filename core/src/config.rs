// Network settings for the snode client

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Seed nodes queried for the active node list when the pool is too small
    pub seed_nodes: Vec<String>,

    /// Below this many known snodes the pool is refreshed from a seed node
    pub minimum_snode_pool_count: usize,

    /// A cached swarm smaller than this is refetched
    pub minimum_swarm_snode_count: usize,

    /// Number of swarm nodes a message is sent to
    pub target_snode_count: usize,

    /// Consecutive failures after which a snode is evicted
    pub failure_threshold: u32,

    /// Number of snodes in an onion path, guard included
    pub path_size: usize,

    /// Number of paths kept at once (one guard per path)
    pub path_count: usize,

    /// Guards reporting an older version are rejected
    pub minimum_snode_version: String,

    /// Attempts made by the retry policy, first attempt included
    pub max_retry_count: usize,

    /// Pause between retry attempts in milliseconds
    pub retry_interval_ms: u64,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Route storage RPCs through onion paths instead of calling nodes directly
    pub use_onion_requests: bool,

    /// Proof-of-work difficulty used until a node asks for another one
    pub initial_pow_difficulty: u32,

    /// Difficulty hints at or above this value are ignored
    pub max_pow_difficulty: u32,

    /// Maximum number of message hashes remembered for deduplication
    pub max_seen_hashes: usize,

    /// Pause between polling rounds in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            seed_nodes: vec![
                "https://storage.seed1.loki.network".to_string(),
                "https://storage.seed3.loki.network".to_string(),
                "https://public.loki.foundation".to_string(),
            ],
            minimum_snode_pool_count: 32,
            minimum_swarm_snode_count: 2,
            target_snode_count: 3,
            failure_threshold: 2,
            path_size: 3,
            path_count: 2,
            minimum_snode_version: "2.0.0".to_string(),
            max_retry_count: 4,
            retry_interval_ms: 1000,
            request_timeout_secs: 20,
            use_onion_requests: true,
            initial_pow_difficulty: 1,
            max_pow_difficulty: 100,
            max_seen_hashes: 50_000,
            poll_interval_ms: 1000,
        }
    }
}

impl NetworkConfig {
    /// Validate settings that would make path building or retrying impossible
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seed_nodes.is_empty() {
            return Err(ConfigError::Invalid("no seed nodes configured".into()));
        }
        if self.path_size == 0 {
            return Err(ConfigError::Invalid("path size must be > 0".into()));
        }
        if self.path_count == 0 {
            return Err(ConfigError::Invalid("path count must be > 0".into()));
        }
        if self.max_retry_count == 0 {
            return Err(ConfigError::Invalid("max retry count must be > 0".into()));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid("failure threshold must be > 0".into()));
        }
        if self.initial_pow_difficulty == 0
            || self.initial_pow_difficulty >= self.max_pow_difficulty
        {
            return Err(ConfigError::Invalid(
                "initial PoW difficulty must be in 1..max_pow_difficulty".into(),
            ));
        }
        if self.max_seen_hashes == 0 {
            return Err(ConfigError::Invalid("seen hash cap must be > 0".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
