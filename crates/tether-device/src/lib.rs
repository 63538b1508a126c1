//! Tether Device - Device lifecycle for the coordination layer
//!
//! This crate owns everything that happens below the runtime binding:
//!
//! - **ConnectionManager**: discovery diffing, transport connections, health pings
//! - **DeviceManager**: runtime-agnostic capability and metadata store
//! - **Transport / DeviceDiscovery**: contracts for the byte-level collaborators
//!
//! ## Background loops
//!
//! Discovery and connection health checks run on two independent intervals.
//! A failing cycle is logged and the next cycle runs as scheduled.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod classifier;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod manager;
pub mod transport;

// Re-exports
pub use classifier::classify_device;
pub use config::ConnectionManagerConfig;
pub use connection::{ConnectionManager, DiscoveryDiff, HealthCheckReport};
pub use discovery::{DeviceDiscovery, StaticDiscovery};
pub use error::{DeviceError, Result};
pub use manager::{DeviceConnection, DeviceManager, DeviceMetadata};
pub use transport::{Transport, TransportError, VirtualTransport};
