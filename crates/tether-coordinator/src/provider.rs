//! Runtime providers
//!
//! A provider describes one runtime type: whether it can run on this host
//! and how to construct its single live instance.

use std::sync::Arc;

use async_trait::async_trait;
use tether_hardware::HardwareRegistry;
use tether_types::{EventBus, Runtime, RuntimeType};

use crate::simulated::SimulatedRuntime;

/// Shared services handed to runtime factories
#[derive(Clone)]
pub struct RuntimeContext {
    pub hardware: Arc<HardwareRegistry>,
    pub events: EventBus,
}

/// Factory and availability check for one runtime type
#[async_trait]
pub trait RuntimeProvider: Send + Sync {
    fn runtime_type(&self) -> RuntimeType;

    /// Whether the runtime can be started on this host
    async fn is_available(&self) -> bool {
        true
    }

    /// Construct the runtime instance; initialization is done by the caller
    fn create(&self, ctx: &RuntimeContext) -> Arc<dyn Runtime>;
}

/// Provides a [`SimulatedRuntime`] posing as the given type
#[derive(Debug, Clone)]
pub struct SimulatedProvider {
    runtime_type: RuntimeType,
    available: bool,
}

impl SimulatedProvider {
    pub fn new(runtime_type: RuntimeType) -> Self {
        Self {
            runtime_type,
            available: true,
        }
    }

    pub fn unavailable(runtime_type: RuntimeType) -> Self {
        Self {
            runtime_type,
            available: false,
        }
    }
}

#[async_trait]
impl RuntimeProvider for SimulatedProvider {
    fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    fn create(&self, ctx: &RuntimeContext) -> Arc<dyn Runtime> {
        Arc::new(SimulatedRuntime::new(self.runtime_type, Arc::clone(&ctx.hardware)))
    }
}
