//! Engine tuning

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::window::DEFAULT_WINDOW_CAPACITY;

/// Pipeline configuration shared by every product engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fetch → apply channel capacity
    pub order_channel_capacity: usize,
    /// Apply → commit channel capacity
    pub log_channel_capacity: usize,
    /// Capacity of each snapshot request/approval channel
    pub snapshot_channel_capacity: usize,
    /// Most logs written to the log store in one call
    pub commit_batch_size: usize,
    /// Extra attempts after a retryable log store failure
    pub commit_retries: u32,
    pub commit_retry_backoff_ms: u64,
    /// Pause after a failed fetch
    pub fetch_retry_backoff_ms: u64,
    pub snapshot_interval_ms: u64,
    /// Orders that must be applied since the last stored snapshot before
    /// a new one is taken
    pub snapshot_threshold: u64,
    /// Dedup window size for fresh books
    pub window_capacity: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            order_channel_capacity: 10_000,
            log_channel_capacity: 10_000,
            snapshot_channel_capacity: 32,
            commit_batch_size: 100,
            commit_retries: 3,
            commit_retry_backoff_ms: 100,
            fetch_retry_backoff_ms: 1_000,
            snapshot_interval_ms: 30_000,
            snapshot_threshold: 1_000,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    pub fn commit_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.commit_retry_backoff_ms)
    }

    pub fn fetch_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_backoff_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.order_channel_capacity == 0
            || self.log_channel_capacity == 0
            || self.snapshot_channel_capacity == 0
        {
            return Err("channel capacities must be greater than 0".to_string());
        }

        if self.commit_batch_size == 0 {
            return Err("commit_batch_size must be greater than 0".to_string());
        }

        if self.snapshot_interval_ms == 0 {
            return Err("snapshot_interval_ms must be greater than 0".to_string());
        }

        if self.window_capacity == 0 {
            return Err("window_capacity must be greater than 0".to_string());
        }

        Ok(())
    }
}
