//! Hardware registry error types

use tether_types::{AbstractionId, ErrorKind, ResourceKey};
use thiserror::Error;

/// Hardware registry errors
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("Hardware abstraction not found: {0}")]
    AbstractionNotFound(AbstractionId),

    #[error("Hardware abstraction already registered: {0}")]
    AlreadyRegistered(AbstractionId),

    #[error("Resource {resource} is owned by {owner}, claim by {claimant} rejected")]
    ResourceConflict {
        resource: ResourceKey,
        owner: AbstractionId,
        claimant: AbstractionId,
    },

    #[error("Resource {resource} is not owned by {abstraction_id}")]
    NotOwner {
        resource: ResourceKey,
        abstraction_id: AbstractionId,
    },
}

impl HardwareError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HardwareError::AbstractionNotFound(_) => ErrorKind::NotFound,
            HardwareError::AlreadyRegistered(_) => ErrorKind::Internal,
            HardwareError::ResourceConflict { .. } | HardwareError::NotOwner { .. } => {
                ErrorKind::ResourceConflict
            }
        }
    }
}

/// Result type for hardware registry operations
pub type Result<T> = std::result::Result<T, HardwareError>;
