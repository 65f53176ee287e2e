use crate::error::{KeelError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a projector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectorConfig {
    /// Maximum number of messages fetched per projection per cycle
    /// Default: 1000
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Attempts per message before the projection is abandoned for the cycle
    /// Default: 3
    #[serde(default = "default_max_projecting_retries")]
    pub max_projecting_retries: u8,

    /// Pause between attempts (milliseconds)
    /// Default: 0
    #[serde(default)]
    pub retry_delay_ms: u64,

    /// Poll interval when caught up (milliseconds)
    /// Default: 100ms
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Back-off after a faulted run (milliseconds)
    /// Default: 1000ms
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// Stamp `dropped_at` on a projection that exhausted its retries
    /// Default: false
    #[serde(default)]
    pub drop_failing_projections: bool,
}

fn default_batch_size() -> usize {
    1000
}

fn default_max_projecting_retries() -> u8 {
    3
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_error_backoff_ms() -> u64 {
    1000
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_projecting_retries: default_max_projecting_retries(),
            retry_delay_ms: 0,
            poll_interval_ms: default_poll_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            drop_failing_projections: false,
        }
    }
}

impl ProjectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_max_projecting_retries(mut self, retries: u8) -> Self {
        self.max_projecting_retries = retries;
        self
    }

    pub fn with_retry_delay_ms(mut self, ms: u64) -> Self {
        self.retry_delay_ms = ms;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_error_backoff_ms(mut self, ms: u64) -> Self {
        self.error_backoff_ms = ms;
        self
    }

    pub fn with_drop_failing_projections(mut self, drop: bool) -> Self {
        self.drop_failing_projections = drop;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(KeelError::Config("batch_size must be at least 1".into()));
        }
        if self.max_projecting_retries == 0 {
            return Err(KeelError::Config(
                "max_projecting_retries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
