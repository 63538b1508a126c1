//! Daemon error types

use thiserror::Error;

/// Daemon errors
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Coordinator error: {0}")]
    Coordinator(#[from] tether_coordinator::CoordinatorError),

    #[error("Signal handler error: {0}")]
    Signal(#[from] std::io::Error),
}

/// Daemon result type
pub type DaemonResult<T> = Result<T, DaemonError>;
