//! Execution error types

use tether_types::{DeviceId, ErrorKind, RuntimeError};
use thiserror::Error;

/// Execution errors
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("No runtime bound to device {0}")]
    NoRuntimeBound(DeviceId),

    #[error("Device {0} is already executing code")]
    AlreadyExecuting(DeviceId),

    #[error("Concurrent execution limit of {limit} reached")]
    ConcurrencyLimitExceeded { limit: usize },

    #[error("Execution on {device_id} timed out after {timeout_ms}ms")]
    Timeout { device_id: DeviceId, timeout_ms: u64 },

    #[error("Execution on {0} was cancelled")]
    Cancelled(DeviceId),

    #[error("Runtime failed on {device_id}: {source}")]
    Runtime {
        device_id: DeviceId,
        #[source]
        source: RuntimeError,
    },
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::NoRuntimeBound(_) => ErrorKind::NoRuntimeBound,
            ExecutionError::AlreadyExecuting(_) => ErrorKind::AlreadyExecuting,
            ExecutionError::ConcurrencyLimitExceeded { .. } => ErrorKind::ConcurrencyLimitExceeded,
            ExecutionError::Timeout { .. } => ErrorKind::Timeout,
            ExecutionError::Cancelled(_) => ErrorKind::Cancelled,
            ExecutionError::Runtime { source, .. } => source.kind(),
        }
    }
}

/// Result type for execution operations
pub type Result<T> = std::result::Result<T, ExecutionError>;
