//! Strongly-typed identifiers for Tether entities
//!
//! Device and abstraction ids are string-based because they come from the
//! outside world (serial paths, board serials). Execution ids are UUIDs.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::runtime::RuntimeType;

/// Identifier of a discovered device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of a hardware abstraction in the shared registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AbstractionId(String);

impl AbstractionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The abstraction id used for a device's binding to a runtime.
    pub fn for_binding(device_id: &DeviceId, runtime_type: RuntimeType) -> Self {
        Self(format!("{}@{}", runtime_type, device_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AbstractionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AbstractionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of a single code execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exec:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_id_generation() {
        let id1 = ExecutionId::generate();
        let id2 = ExecutionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("exec:"));
    }

    #[test]
    fn test_binding_abstraction_id() {
        let device = DeviceId::new("/dev/ttyACM0");
        let id = AbstractionId::for_binding(&device, RuntimeType::CircuitPython);
        assert_eq!(id.as_str(), "circuitpython@/dev/ttyACM0");
    }
}
