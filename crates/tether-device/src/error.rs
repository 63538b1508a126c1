//! Device error types

use tether_types::{DeviceId, DeviceProtocol, ErrorKind};
use thiserror::Error;

/// Device lifecycle errors
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("No transport registered for protocol {0}")]
    NoTransport(DeviceProtocol),

    #[error("Connection to {device_id} failed: {message}")]
    Connection { device_id: DeviceId, message: String },

    #[error("Connection to {device_id} timed out after {timeout_ms}ms")]
    Timeout { device_id: DeviceId, timeout_ms: u64 },

    #[error("Discovery failed: {0}")]
    Discovery(String),
}

impl DeviceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::DeviceNotFound(_) => ErrorKind::NotFound,
            DeviceError::Timeout { .. } => ErrorKind::Timeout,
            DeviceError::NoTransport(_)
            | DeviceError::Connection { .. }
            | DeviceError::Discovery(_) => ErrorKind::ConnectionError,
        }
    }
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;
