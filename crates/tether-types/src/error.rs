//! Shared error taxonomy
//!
//! Each Tether crate has its own error enum; all of them map onto
//! [`ErrorKind`] so callers can branch on the failure class without
//! matching every subsystem's variants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::DeviceId;
use crate::runtime::RuntimeType;

/// Failure classes surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    AlreadyExecuting,
    ConcurrencyLimitExceeded,
    NoRuntimeBound,
    NoSuitableRuntime,
    ConnectionError,
    ResourceConflict,
    Timeout,
    Cancelled,
    /// The runtime backend itself reported a failure
    Runtime,
    Internal,
}

/// Errors reported by runtime backends
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("runtime {0} is not initialized")]
    NotInitialized(RuntimeType),

    #[error("runtime initialization failed: {0}")]
    Initialization(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("device {device_id}: {reason}")]
    Device { device_id: DeviceId, reason: String },

    #[error("runtime unavailable: {0}")]
    Unavailable(String),
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::Device { .. } => ErrorKind::ConnectionError,
            _ => ErrorKind::Runtime,
        }
    }
}
