//! Tether Coordinator - Runtime coordination facade
//!
//! The [`RuntimeCoordinator`] owns the runtime registry and wires the device,
//! hardware, selection, binding and execution subsystems together.
//!
//! ## Startup
//!
//! 1. Flagship runtime (hard dependency; failure aborts startup)
//! 2. Every other available runtime (failures are logged and skipped)
//! 3. Shared simulated runtime for virtual devices
//! 4. Background loops: discovery, connection health, runtime health,
//!    device-event reactor
//!
//! Shutdown runs in reverse.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod builder;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod health;
pub mod provider;
mod reactor;
pub mod simulated;

// Re-exports
pub use builder::RuntimeCoordinatorBuilder;
pub use config::{CoordinatorConfig, HealthMonitorConfig, LoggingConfig};
pub use coordinator::RuntimeCoordinator;
pub use error::{CoordinatorError, Result};
pub use health::RuntimeHealth;
pub use provider::{RuntimeContext, RuntimeProvider, SimulatedProvider};
pub use simulated::SimulatedRuntime;
