//! Tether Daemon - runtime coordination service
//!
//! Runs a [`RuntimeCoordinator`] until interrupted:
//! - periodic device discovery and connection health checks
//! - auto-binding of discovered devices
//! - runtime health monitoring and stale binding cleanup
//! - event logging for observability

#![deny(unsafe_code)]

use std::sync::Arc;

use clap::Parser;
use tether_coordinator::{CoordinatorConfig, RuntimeCoordinator, SimulatedProvider};
use tether_device::StaticDiscovery;
use tether_types::{Device, EventSeverity, RuntimeType, TetherEventEnvelope};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod error;

use error::{DaemonError, DaemonResult};

/// Tether Daemon CLI
#[derive(Parser)]
#[command(name = "tetherd")]
#[command(about = "Tether Daemon - runtime coordination service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "TETHER_CONFIG")]
    config: Option<String>,

    /// Log level
    #[arg(long, env = "TETHER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "TETHER_LOG_JSON")]
    json: bool,

    /// Number of virtual devices to serve through static discovery
    #[arg(long, default_value_t = 0)]
    virtual_devices: usize,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration; CLI flags override file and environment
    let mut config = CoordinatorConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }

    init_tracing(&config);

    let discovery = Arc::new(StaticDiscovery::with_devices((1..=cli.virtual_devices).map(|n| {
        Device::virtual_device(format!("virtual-{}", n), format!("Virtual Board {}", n))
    })));

    let mut builder = RuntimeCoordinator::builder()
        .with_config(config)
        .with_discovery(discovery);
    for runtime_type in RuntimeType::ALL {
        builder = builder.with_provider(Arc::new(SimulatedProvider::new(runtime_type)));
    }
    let coordinator = builder.build();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        virtual_devices = cli.virtual_devices,
        "Starting Tether daemon"
    );

    coordinator.initialize().await?;
    let event_log = tokio::spawn(log_events(coordinator.subscribe()));

    shutdown_signal().await?;

    tracing::info!("Tether daemon shutting down");
    coordinator.shutdown().await;
    event_log.abort();

    Ok(())
}

fn init_tracing(config: &CoordinatorConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Mirror coordinator events into the log at their severity
async fn log_events(mut rx: broadcast::Receiver<TetherEventEnvelope>) {
    loop {
        match rx.recv().await {
            Ok(envelope) => match envelope.severity {
                EventSeverity::Error => {
                    tracing::error!(source = ?envelope.source, event = ?envelope.event, "Event")
                }
                EventSeverity::Warning => {
                    tracing::warn!(source = ?envelope.source, event = ?envelope.event, "Event")
                }
                _ => tracing::debug!(source = ?envelope.source, event = ?envelope.event, "Event"),
            },
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() -> DaemonResult<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
    Ok(())
}
