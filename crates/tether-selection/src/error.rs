//! Selection error types

use tether_types::{DeviceId, ErrorKind};
use thiserror::Error;

/// Selection errors
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("No suitable runtime for device {0}")]
    NoSuitableRuntime(DeviceId),
}

impl SelectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SelectionError::NoSuitableRuntime(_) => ErrorKind::NoSuitableRuntime,
        }
    }
}

/// Result type for selection operations
pub type Result<T> = std::result::Result<T, SelectionError>;
