//! Execution request and result types

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_types::{DeviceId, ExecutionId, ExecutionMode, RuntimeType};

use crate::error::Result;

/// Per-call execution options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    pub mode: ExecutionMode,

    /// Overrides the configured default timeout
    pub timeout: Option<Duration>,
}

impl ExecutionOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }
}

/// One entry of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub device_id: DeviceId,
    pub code: String,
    #[serde(default)]
    pub options: ExecutionOptions,
}

impl ExecutionRequest {
    pub fn new(device_id: impl Into<DeviceId>, code: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            code: code.into(),
            options: ExecutionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }
}

/// Counters attached to a finished execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Non-blank source lines submitted
    pub lines_executed: usize,

    /// Lines of output produced
    pub output_lines: usize,

    pub memory_used: Option<u64>,
}

/// Normalized result of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub device_id: DeviceId,
    pub runtime_type: RuntimeType,
    pub mode: ExecutionMode,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub return_value: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub metrics: ExecutionMetrics,
}

/// Outcome of one batch entry, in submission order
#[derive(Debug)]
pub struct BatchResult {
    pub index: usize,
    pub device_id: DeviceId,
    pub result: Result<ExecutionResult>,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        matches!(&self.result, Ok(r) if r.success)
    }
}

/// Live view of an active execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatusReport {
    pub execution_id: ExecutionId,
    pub device_id: DeviceId,
    pub runtime_type: RuntimeType,
    pub mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub timeout_ms: u64,

    /// Time left before the timeout fires
    pub estimated_remaining_ms: u64,

    /// Logical lines finished, for streamed executions
    pub lines_completed: usize,
    pub lines_total: usize,
}

impl ExecutionStatusReport {
    /// Fraction of logical lines finished, if the execution is line-based
    pub fn progress(&self) -> Option<f64> {
        (self.lines_total > 0).then(|| self.lines_completed as f64 / self.lines_total as f64)
    }
}

/// Aggregate figures over the history window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatistics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub active: usize,
    pub average_duration_ms: f64,
}

/// One item of a streamed execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// About to run logical line `line` (1-based) of `total`
    Progress {
        execution_id: ExecutionId,
        line: usize,
        total: usize,
        code: String,
    },

    /// Output of the line just run
    Output {
        execution_id: ExecutionId,
        line: usize,
        output: String,
        is_error: bool,
    },

    /// Terminal item; always last
    Complete {
        execution_id: ExecutionId,
        success: bool,
        lines_executed: usize,
        duration_ms: u64,
    },
}

impl StreamEvent {
    pub fn is_complete(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. })
    }
}
