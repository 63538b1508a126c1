//! Tether Hardware - Shared hardware abstraction registry
//!
//! Every active binding gets a hardware abstraction: a namespace of pin,
//! sensor and component state. Each write is mirrored into registry-wide
//! maps so that all bindings see the same physical picture.
//!
//! ## Resource ownership
//!
//! Before any write, the writer must claim the resource key (`pin_<n>`,
//! `sensor_<id>`, `component_<id>`). A key has at most one owner. Contested
//! claims are resolved by the configured [`ConflictResolution`] strategy and
//! always produce a `HardwareConflict` event.
//!
//! [`ConflictResolution`]: tether_types::ConflictResolution

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod error;
pub mod registry;
pub mod state;

// Re-exports
pub use config::HardwareConfig;
pub use error::{HardwareError, Result};
pub use registry::HardwareRegistry;
pub use state::{
    AbstractionSummary, ClaimOutcome, ComponentState, HardwareAbstraction, HardwareStateSummary,
    HistoryEntry, PinState, SensorState, StateChange,
};
