//! Connection manager configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and default parameters for the connection manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionManagerConfig {
    /// Device discovery interval in milliseconds
    pub discovery_interval_ms: u64,

    /// Connection health check interval in milliseconds
    pub health_check_interval_ms: u64,

    /// Connection attempt timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Baud rate used when the caller does not supply one
    pub default_baud_rate: u32,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            discovery_interval_ms: 2_000,
            health_check_interval_ms: 5_000,
            connect_timeout_ms: 5_000,
            default_baud_rate: 115_200,
        }
    }
}

impl ConnectionManagerConfig {
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
