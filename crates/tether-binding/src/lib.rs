//! Tether Binding - Device to runtime binding lifecycle
//!
//! The binder owns the association between a device and the single runtime
//! it is bound to. It does not choose runtimes; callers pass the runtime in.
//!
//! - Binding an already bound device switches it instead of duplicating it
//! - Runtime-level connect/disconnect hooks are best-effort
//! - Only binding metadata ([`BindingRecord`]) is persisted; live runtimes
//!   are always re-acquired

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod binder;
pub mod binding;
pub mod error;
pub mod store;

// Re-exports
pub use binder::RuntimeBinder;
pub use binding::{
    BindingPreferences, BindingRecord, PreviousBinding, RuntimeBinding, MAX_PREVIOUS_RUNTIMES,
};
pub use error::{BindingError, Result};
pub use store::{BindingStore, InMemoryBindingStore};
