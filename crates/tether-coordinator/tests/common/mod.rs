//! Shared fixtures for coordinator integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tether_coordinator::{CoordinatorConfig, RuntimeContext, RuntimeProvider};
use tether_types::{
    ExecutionContext, Runtime, RuntimeError, RuntimeExecutionResult, RuntimeInfo, RuntimeType,
    TetherEvent, TetherEventEnvelope,
};
use tokio::sync::broadcast;

/// Intervals long enough that only the startup tick of each loop runs
pub fn quiet_config() -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default();
    config.connection.discovery_interval_ms = 3_600_000;
    config.connection.health_check_interval_ms = 3_600_000;
    config.health.interval_ms = 3_600_000;
    config
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

pub fn drain(rx: &mut broadcast::Receiver<TetherEventEnvelope>) -> Vec<TetherEvent> {
    let mut events = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        events.push(envelope.event);
    }
    events
}

/// Shared log of runtime lifecycle calls
pub type LifecycleLog = Arc<Mutex<Vec<String>>>;

/// Runtime with a controllable liveness flag and optional init failure
pub struct TestRuntime {
    runtime_type: RuntimeType,
    ready: Arc<AtomicBool>,
    fail_init: bool,
    log: LifecycleLog,
}

#[async_trait]
impl Runtime for TestRuntime {
    fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    fn info(&self) -> RuntimeInfo {
        RuntimeInfo::new(self.runtime_type, "test")
    }

    async fn initialize(&self) -> Result<(), RuntimeError> {
        if self.fail_init {
            return Err(RuntimeError::Initialization("engine missing".into()));
        }
        self.ready.store(true, Ordering::SeqCst);
        self.log.lock().push(format!("init:{}", self.runtime_type));
        Ok(())
    }

    async fn dispose(&self) -> Result<(), RuntimeError> {
        self.ready.store(false, Ordering::SeqCst);
        self.log.lock().push(format!("dispose:{}", self.runtime_type));
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn execute_code(
        &self,
        code: &str,
        _ctx: &ExecutionContext,
    ) -> Result<RuntimeExecutionResult, RuntimeError> {
        Ok(RuntimeExecutionResult::ok(format!("{}: {}\n", self.runtime_type, code)))
    }
}

/// Provider for [`TestRuntime`]
pub struct TestProvider {
    pub runtime_type: RuntimeType,
    pub available: bool,
    pub fail_init: bool,
    pub ready: Arc<AtomicBool>,
    pub log: LifecycleLog,
}

impl TestProvider {
    pub fn new(runtime_type: RuntimeType, log: &LifecycleLog) -> Self {
        Self {
            runtime_type,
            available: true,
            fail_init: false,
            ready: Arc::new(AtomicBool::new(false)),
            log: Arc::clone(log),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }
}

#[async_trait]
impl RuntimeProvider for TestProvider {
    fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    fn create(&self, _ctx: &RuntimeContext) -> Arc<dyn Runtime> {
        Arc::new(TestRuntime {
            runtime_type: self.runtime_type,
            ready: Arc::clone(&self.ready),
            fail_init: self.fail_init,
            log: Arc::clone(&self.log),
        })
    }
}
