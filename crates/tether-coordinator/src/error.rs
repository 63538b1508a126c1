//! Coordinator error types

use tether_types::{ErrorKind, RuntimeError, RuntimeType};
use thiserror::Error;

/// Coordinator error type
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Device subsystem error
    #[error("Device error: {0}")]
    Device(#[from] tether_device::DeviceError),

    /// Hardware subsystem error
    #[error("Hardware error: {0}")]
    Hardware(#[from] tether_hardware::HardwareError),

    /// Selection subsystem error
    #[error("Selection error: {0}")]
    Selection(#[from] tether_selection::SelectionError),

    /// Binding subsystem error
    #[error("Binding error: {0}")]
    Binding(#[from] tether_binding::BindingError),

    /// Execution subsystem error
    #[error("Execution error: {0}")]
    Execution(#[from] tether_execution::ExecutionError),

    /// No provider or live instance for a runtime type
    #[error("Runtime not registered: {0}")]
    RuntimeNotRegistered(RuntimeType),

    /// A runtime failed to initialize
    #[error("Runtime {runtime_type} failed to initialize: {source}")]
    RuntimeInitialization {
        runtime_type: RuntimeType,
        #[source]
        source: RuntimeError,
    },

    /// `initialize` called twice
    #[error("Coordinator already started")]
    AlreadyStarted,

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl CoordinatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordinatorError::Device(e) => e.kind(),
            CoordinatorError::Hardware(e) => e.kind(),
            CoordinatorError::Selection(e) => e.kind(),
            CoordinatorError::Binding(e) => e.kind(),
            CoordinatorError::Execution(e) => e.kind(),
            CoordinatorError::RuntimeNotRegistered(_) => ErrorKind::NotFound,
            CoordinatorError::RuntimeInitialization { .. } => ErrorKind::Runtime,
            CoordinatorError::AlreadyStarted
            | CoordinatorError::Config(_) => ErrorKind::Internal,
        }
    }
}

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;
