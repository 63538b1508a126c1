//! Execution manager configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Execution manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Process-wide cap on simultaneous executions
    pub max_concurrent_executions: usize,

    /// Timeout applied when the caller does not supply one
    pub default_timeout_ms: u64,

    /// Execution history capacity; oldest entries are evicted first
    pub max_history_size: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 5,
            default_timeout_ms: 30_000,
            max_history_size: 100,
        }
    }
}

impl ExecutionConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}
