//! Tether Types - Core types for the runtime coordination layer
//!
//! Tether discovers microcontroller boards, binds each one to exactly one
//! interchangeable execution backend (a "runtime"), arbitrates shared hardware
//! resources across runtimes, and executes code against bound devices.
//!
//! ## Architectural Boundaries
//!
//! - **tether-device** owns: discovery, transport connections, capability inference
//! - **tether-hardware** owns: the shared pin/sensor/component namespace
//! - **tether-selection** owns: scoring runtimes for a device
//! - **tether-binding** owns: the device -> runtime association
//! - **tether-execution** owns: running code through a bound runtime
//! - **tether-coordinator** owns: startup/shutdown sequencing and wiring
//!
//! ## Key Concepts
//!
//! - **Device**: a discovered board, identified by [`DeviceId`]
//! - **Runtime**: an opaque backend implementing the [`Runtime`] contract
//! - **Capabilities**: inferred feature flags per device
//! - **Events**: a unified [`TetherEventEnvelope`] stream over an [`EventBus`]

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod capability;
pub mod device;
pub mod error;
pub mod events;
pub mod hardware;
pub mod ids;
pub mod runtime;

// Re-export main types
pub use capability::{CapabilitiesUpdate, Capability, DeviceCapabilities};
pub use device::{
    Connection, ConnectionConfig, ConnectionStatus, Device, DeviceProtocol, TransportParams,
};
pub use error::{ErrorKind, RuntimeError};
pub use events::{EventBus, EventSeverity, EventSource, TetherEvent, TetherEventEnvelope};
pub use hardware::{ConflictResolution, PinMode, PinValue, ResourceKey};
pub use ids::{AbstractionId, DeviceId, ExecutionId};
pub use runtime::{
    DeviceHooks, ExecutionContext, ExecutionMode, InterruptHook, Runtime, RuntimeExecutionResult,
    RuntimeInfo, RuntimeType,
};
