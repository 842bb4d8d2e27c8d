// Node Configuration

use super::NodeError;
use crate::gossip::GossipConfig;
use crate::resolver::DoubleCacheConfig;
use crate::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Everything needed to start a node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    pub transport: TransportConfig,
    pub cache: DoubleCacheConfig,
    pub gossip: GossipConfig,
    pub dial: DialConfig,
    /// Directory of a sled store kept behind the cache
    pub store_path: Option<PathBuf>,
}

/// How failed dials are retried
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialConfig {
    /// Wait between attempts
    pub retry_delay_ms: u64,
    /// Give up after this many attempts (None retries until shutdown)
    pub max_attempts: Option<u32>,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 1_000,
            max_attempts: None,
        }
    }
}

impl DialConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = self.cache.with_capacity(capacity);
        self
    }

    pub fn with_gossip(mut self, gossip: GossipConfig) -> Self {
        self.gossip = gossip;
        self
    }

    pub fn with_dial_retry(mut self, delay: Duration) -> Self {
        self.dial.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_dial_attempts(mut self, attempts: u32) -> Self {
        self.dial.max_attempts = Some(attempts);
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), NodeError> {
        self.transport
            .validate()
            .map_err(|e| NodeError::Config(e.to_string()))?;
        if self.cache.capacity == 0 {
            return Err(NodeError::Config("cache capacity cannot be 0".to_string()));
        }
        if self.dial.retry_delay_ms == 0 {
            return Err(NodeError::Config("dial retry delay cannot be 0".to_string()));
        }
        if self.dial.max_attempts == Some(0) {
            return Err(NodeError::Config("max dial attempts cannot be 0".to_string()));
        }
        Ok(())
    }
}
