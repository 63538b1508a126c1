//! Tether Execution - Running code through bound runtimes
//!
//! The [`ExecutionManager`] resolves a device's bound runtime and runs code
//! through it, single-shot, batched or streamed.
//!
//! ## Admission control
//!
//! - At most one active execution per device (`AlreadyExecuting`)
//! - At most `max_concurrent_executions` process-wide (`ConcurrencyLimitExceeded`)
//!
//! The active-execution record is owned by a guard, so it is removed on every
//! exit path: completion, failure, timeout, interruption, or the caller
//! dropping the future or stream.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

mod active;
pub mod config;
pub mod error;
pub mod lines;
pub mod manager;
pub mod types;

// Re-exports
pub use config::ExecutionConfig;
pub use error::{ExecutionError, Result};
pub use lines::split_logical_lines;
pub use manager::ExecutionManager;
pub use types::{
    BatchResult, ExecutionMetrics, ExecutionOptions, ExecutionRequest, ExecutionResult,
    ExecutionStatistics, ExecutionStatusReport, StreamEvent,
};
