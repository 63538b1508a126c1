//! Runtime backend contract
//!
//! A runtime is an opaque execution backend identified by its [`RuntimeType`].
//! Optional behavior (per-device connect/disconnect, interrupt) is exposed as
//! explicit capability accessors returning `Option<&dyn ...>` rather than being
//! discovered by inspecting the backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::capability::Capability;
use crate::error::RuntimeError;
use crate::ids::{DeviceId, ExecutionId};

/// Runtime variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Flagship runtime and terminal selection fallback
    CircuitPython,
    /// Alternate embedded runtime
    MicroPython,
    /// Generic host-side Python (Blinka-style bridge)
    Python,
}

impl RuntimeType {
    /// The designated flagship runtime
    pub const FLAGSHIP: RuntimeType = RuntimeType::CircuitPython;

    /// Every runtime variant, flagship first
    pub const ALL: [RuntimeType; 3] = [
        RuntimeType::CircuitPython,
        RuntimeType::MicroPython,
        RuntimeType::Python,
    ];

    pub fn is_flagship(self) -> bool {
        self == Self::FLAGSHIP
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeType::CircuitPython => "circuitpython",
            RuntimeType::MicroPython => "micropython",
            RuntimeType::Python => "python",
        }
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "circuitpython" | "cp" => Ok(RuntimeType::CircuitPython),
            "micropython" | "mp" => Ok(RuntimeType::MicroPython),
            "python" | "blinka" => Ok(RuntimeType::Python),
            other => Err(format!("Unknown runtime type: {}", other)),
        }
    }
}

/// Static description of a runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub runtime_type: RuntimeType,
    pub version: String,

    /// Capabilities the runtime explicitly cannot drive, even if the board has them
    #[serde(default)]
    pub unsupported: BTreeSet<Capability>,
}

impl RuntimeInfo {
    pub fn new(runtime_type: RuntimeType, version: impl Into<String>) -> Self {
        Self {
            runtime_type,
            version: version.into(),
            unsupported: BTreeSet::new(),
        }
    }

    pub fn without(mut self, capability: Capability) -> Self {
        self.unsupported.insert(capability);
        self
    }
}

/// How code should be run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Paste into the REPL
    #[default]
    Repl,
    /// Write to the board and run as a file
    File,
    /// Line-by-line with live feedback
    Stream,
}

/// Per-call context handed to a runtime
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: ExecutionId,
    pub device_id: DeviceId,
    pub mode: ExecutionMode,
    pub timeout: Duration,

    /// Signalled when the caller stops waiting for this execution
    pub cancellation: CancellationToken,
}

/// Raw result shape returned by a runtime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub return_value: Option<serde_json::Value>,
    pub memory_used: Option<u64>,
}

impl RuntimeExecutionResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stderr: stderr.into(),
            ..Default::default()
        }
    }
}

/// Execution backend contract
#[async_trait]
pub trait Runtime: Send + Sync {
    fn runtime_type(&self) -> RuntimeType;

    fn info(&self) -> RuntimeInfo;

    async fn initialize(&self) -> Result<(), RuntimeError>;

    async fn dispose(&self) -> Result<(), RuntimeError>;

    /// Liveness flag polled by the coordinator's health monitor
    fn is_ready(&self) -> bool;

    async fn execute_code(
        &self,
        code: &str,
        ctx: &ExecutionContext,
    ) -> Result<RuntimeExecutionResult, RuntimeError>;

    /// Optional per-device connect/disconnect hooks
    fn device_hooks(&self) -> Option<&dyn DeviceHooks> {
        None
    }

    /// Optional interrupt hook
    fn interrupt_hook(&self) -> Option<&dyn InterruptHook> {
        None
    }
}

/// Runtime-level attach/detach for a device
#[async_trait]
pub trait DeviceHooks: Send + Sync {
    async fn connect_to_device(&self, device_id: &DeviceId) -> Result<(), RuntimeError>;

    async fn disconnect_from_device(&self, device_id: &DeviceId) -> Result<(), RuntimeError>;
}

/// Best-effort interruption of running code
#[async_trait]
pub trait InterruptHook: Send + Sync {
    async fn interrupt(&self, device_id: &DeviceId) -> Result<(), RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_type_parse() {
        assert_eq!("CircuitPython".parse::<RuntimeType>(), Ok(RuntimeType::CircuitPython));
        assert_eq!("mp".parse::<RuntimeType>(), Ok(RuntimeType::MicroPython));
        assert!("lua".parse::<RuntimeType>().is_err());
    }

    #[test]
    fn test_flagship() {
        assert!(RuntimeType::CircuitPython.is_flagship());
        assert!(!RuntimeType::Python.is_flagship());
        assert_eq!(RuntimeType::ALL[0], RuntimeType::FLAGSHIP);
    }
}
