//! Binding error types

use tether_types::{DeviceId, ErrorKind};
use thiserror::Error;

/// Binding errors
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("No runtime bound to device {0}")]
    NotBound(DeviceId),

    #[error("Binding store error: {0}")]
    Store(String),
}

impl BindingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BindingError::NotBound(_) => ErrorKind::NoRuntimeBound,
            BindingError::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Result type for binding operations
pub type Result<T> = std::result::Result<T, BindingError>;
