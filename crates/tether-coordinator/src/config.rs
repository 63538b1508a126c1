//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tether_device::ConnectionManagerConfig;
use tether_execution::ExecutionConfig;
use tether_hardware::HardwareConfig;
use tether_selection::SelectionConfig;

/// Complete coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Discovery, connection health and connect timeouts
    #[serde(default)]
    pub connection: ConnectionManagerConfig,

    /// Hardware registry conflict strategy, priorities and history
    #[serde(default)]
    pub hardware: HardwareConfig,

    /// Runtime selection strategies and weights
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Execution admission limits, timeout and history
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Runtime health monitoring
    #[serde(default)]
    pub health: HealthMonitorConfig,

    /// Bind newly discovered devices automatically
    #[serde(default = "default_true")]
    pub auto_bind: bool,

    /// Start the shared simulated runtime for virtual devices
    #[serde(default = "default_true")]
    pub simulated_runtime: bool,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionManagerConfig::default(),
            hardware: HardwareConfig::default(),
            selection: SelectionConfig::default(),
            execution: ExecutionConfig::default(),
            health: HealthMonitorConfig::default(),
            auto_bind: true,
            simulated_runtime: true,
            logging: LoggingConfig::default(),
        }
    }
}

/// Runtime health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMonitorConfig {
    /// Monitor interval in milliseconds
    #[serde(default = "default_monitor_interval")]
    pub interval_ms: u64,

    /// Bindings idle longer than this are released
    #[serde(default = "default_stale_binding_age")]
    pub stale_binding_max_age_secs: u64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_monitor_interval(),
            stale_binding_max_age_secs: default_stale_binding_age(),
        }
    }
}

impl HealthMonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn stale_binding_max_age(&self) -> Duration {
        Duration::from_secs(self.stale_binding_max_age_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_monitor_interval() -> u64 {
    10_000
}

fn default_stale_binding_age() -> u64 {
    30 * 60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl CoordinatorConfig {
    /// Load configuration: defaults, then an optional file, then
    /// `TETHER_`-prefixed environment variables
    ///
    /// Nested keys use a double underscore, e.g.
    /// `TETHER_EXECUTION__MAX_CONCURRENT_EXECUTIONS=8`.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&CoordinatorConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TETHER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Short intervals for development against virtual devices
    pub fn development() -> Self {
        let mut config = Self::default();
        config.connection.discovery_interval_ms = 1_000;
        config.health.interval_ms = 2_000;
        config.logging.level = "debug".to_string();
        config
    }
}
