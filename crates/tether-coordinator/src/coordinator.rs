//! Main RuntimeCoordinator implementation
//!
//! The coordinator is the single entry point for UI and CLI collaborators.
//! It owns one live instance per runtime type and composes the device,
//! hardware, selection, binding and execution subsystems behind one API.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::BoxStream;
use parking_lot::{Mutex, RwLock};
use tether_binding::{BindingPreferences, BindingRecord, RuntimeBinder};
use tether_device::{ConnectionManager, DeviceConnection, DeviceError, DeviceManager};
use tether_execution::{
    BatchResult, ExecutionManager, ExecutionOptions, ExecutionRequest, ExecutionResult,
    ExecutionStatusReport, StreamEvent,
};
use tether_hardware::{ComponentState, HardwareRegistry, HardwareStateSummary, PinState, SensorState};
use tether_selection::{RuntimeCandidate, SelectionPolicy, SelectionPreferences, SelectionResult};
use tether_types::{
    AbstractionId, Device, DeviceCapabilities, DeviceId, EventBus, EventSource, Runtime,
    RuntimeType, TetherEvent, TetherEventEnvelope,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::health::RuntimeHealth;
use crate::provider::{RuntimeContext, RuntimeProvider};
use crate::simulated::SimulatedRuntime;

/// Background tasks owned by a started coordinator
#[derive(Default)]
struct Lifecycle {
    shutdown: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

/// Runtime coordination facade
pub struct RuntimeCoordinator {
    pub(crate) config: CoordinatorConfig,
    pub(crate) events: EventBus,

    connections: Arc<ConnectionManager>,
    devices: Arc<DeviceManager>,
    hardware: Arc<HardwareRegistry>,
    policy: SelectionPolicy,
    pub(crate) binder: Arc<RuntimeBinder>,
    executions: Arc<ExecutionManager>,

    /// One provider per runtime type, flagship first
    providers: BTreeMap<RuntimeType, Arc<dyn RuntimeProvider>>,

    /// Live runtime instances
    pub(crate) runtimes: DashMap<RuntimeType, Arc<dyn Runtime>>,

    /// Initialization order, reversed on shutdown
    init_order: Mutex<Vec<RuntimeType>>,

    pub(crate) health: DashMap<RuntimeType, RuntimeHealth>,

    /// Shared runtime for virtual devices
    simulated: RwLock<Option<Arc<SimulatedRuntime>>>,

    /// Serializes reconciliation of abstractions against bindings
    abstraction_sync: Mutex<()>,

    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl RuntimeCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        config: CoordinatorConfig,
        events: EventBus,
        connections: Arc<ConnectionManager>,
        hardware: Arc<HardwareRegistry>,
        policy: SelectionPolicy,
        binder: Arc<RuntimeBinder>,
        executions: Arc<ExecutionManager>,
        providers: BTreeMap<RuntimeType, Arc<dyn RuntimeProvider>>,
    ) -> Self {
        let devices = Arc::new(DeviceManager::new(Arc::clone(&connections)));
        Self {
            config,
            events,
            connections,
            devices,
            hardware,
            policy,
            binder,
            executions,
            providers,
            runtimes: DashMap::new(),
            init_order: Mutex::new(Vec::new()),
            health: DashMap::new(),
            simulated: RwLock::new(None),
            abstraction_sync: Mutex::new(()),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
        }
    }

    pub fn builder() -> crate::builder::RuntimeCoordinatorBuilder {
        crate::builder::RuntimeCoordinatorBuilder::new()
    }

    // ========== Lifecycle ==========

    /// Start runtimes and background loops
    ///
    /// The flagship runtime is a hard dependency: if it is missing or fails
    /// to initialize, startup aborts. Other runtimes and the shared simulated
    /// runtime are started best-effort.
    #[instrument(skip(self))]
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.shutdown.is_some() {
            return Err(CoordinatorError::AlreadyStarted);
        }

        let ctx = RuntimeContext {
            hardware: Arc::clone(&self.hardware),
            events: self.events.clone(),
        };

        // Phase 1: flagship
        let flagship = self
            .providers
            .get(&RuntimeType::FLAGSHIP)
            .cloned()
            .ok_or(CoordinatorError::RuntimeNotRegistered(RuntimeType::FLAGSHIP))?;
        self.start_runtime(flagship.as_ref(), &ctx).await?;

        // Phase 2: everything else, best-effort
        for (runtime_type, provider) in &self.providers {
            if runtime_type.is_flagship() {
                continue;
            }
            if !provider.is_available().await {
                info!(runtime = %runtime_type, "Runtime not available, skipping");
                continue;
            }
            if let Err(e) = self.start_runtime(provider.as_ref(), &ctx).await {
                warn!(runtime = %runtime_type, error = %e, "Optional runtime failed to start");
            }
        }

        // Phase 3: shared simulated runtime
        if self.config.simulated_runtime {
            let simulated = Arc::new(SimulatedRuntime::new(RuntimeType::FLAGSHIP, Arc::clone(&self.hardware)));
            match simulated.initialize().await {
                Ok(()) => {
                    *self.simulated.write() = Some(simulated);
                    debug!("Shared simulated runtime started");
                }
                Err(e) => warn!(error = %e, "Shared simulated runtime failed to start"),
            }
        }

        // Phase 4: background loops; the reactor subscribes before discovery runs
        let token = CancellationToken::new();
        let mut tasks = vec![crate::reactor::spawn(self, token.child_token())];
        tasks.extend(self.connections.spawn_background_tasks(token.child_token()));
        tasks.push(self.spawn_health_monitor(token.child_token()));

        lifecycle.shutdown = Some(token);
        lifecycle.tasks = tasks;

        let runtimes = self.available_runtimes();
        info!(runtimes = ?runtimes, "Runtime coordinator ready");
        self.events
            .emit(EventSource::Coordinator, TetherEvent::CoordinatorReady { runtimes });
        Ok(())
    }

    async fn start_runtime(&self, provider: &dyn RuntimeProvider, ctx: &RuntimeContext) -> Result<()> {
        let runtime_type = provider.runtime_type();
        let runtime = provider.create(ctx);

        if let Err(source) = runtime.initialize().await {
            error!(runtime = %runtime_type, error = %source, "Runtime initialization failed");
            self.events.emit(
                EventSource::Coordinator,
                TetherEvent::RuntimeInitializationFailed {
                    runtime_type,
                    reason: source.to_string(),
                },
            );
            return Err(CoordinatorError::RuntimeInitialization {
                runtime_type,
                source,
            });
        }

        let info = runtime.info();
        self.health.insert(
            runtime_type,
            RuntimeHealth::new(runtime_type, info.version.clone(), runtime.is_ready()),
        );
        self.runtimes.insert(runtime_type, runtime);
        self.init_order.lock().push(runtime_type);

        info!(runtime = %runtime_type, version = %info.version, "Runtime initialized");
        self.events
            .emit(EventSource::Coordinator, TetherEvent::RuntimeInitialized { runtime_type });
        Ok(())
    }

    pub async fn is_started(&self) -> bool {
        self.lifecycle.lock().await.shutdown.is_some()
    }

    /// Stop background loops, release every binding and dispose runtimes
    ///
    /// Disposal is best-effort; a failing runtime does not block the rest.
    /// A coordinator that was never started is left untouched.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let (token, tasks) = {
            let mut lifecycle = self.lifecycle.lock().await;
            (lifecycle.shutdown.take(), std::mem::take(&mut lifecycle.tasks))
        };
        let Some(token) = token else {
            debug!("Coordinator not started, nothing to shut down");
            return;
        };

        token.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        for binding in self.binder.list_bindings() {
            if let Err(e) = self.unbind_device(&binding.device_id).await {
                warn!(device_id = %binding.device_id, error = %e, "Failed to release binding during shutdown");
            }
        }

        let order = std::mem::take(&mut *self.init_order.lock());
        for runtime_type in order.iter().rev() {
            if let Some((_, runtime)) = self.runtimes.remove(runtime_type) {
                if let Err(e) = runtime.dispose().await {
                    warn!(runtime = %runtime_type, error = %e, "Runtime dispose failed");
                }
            }
        }

        let simulated = self.simulated.write().take();
        if let Some(simulated) = simulated {
            if let Err(e) = simulated.dispose().await {
                warn!(error = %e, "Shared simulated runtime dispose failed");
            }
        }

        self.runtimes.clear();
        self.health.clear();

        info!("Runtime coordinator shut down");
        self.events
            .emit(EventSource::Coordinator, TetherEvent::CoordinatorShutdown);
    }

    // ========== Accessors ==========

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to state, binding and connection events
    pub fn subscribe(&self) -> broadcast::Receiver<TetherEventEnvelope> {
        self.events.subscribe()
    }

    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn device_manager(&self) -> &Arc<DeviceManager> {
        &self.devices
    }

    pub fn hardware(&self) -> &Arc<HardwareRegistry> {
        &self.hardware
    }

    pub fn binder(&self) -> &Arc<RuntimeBinder> {
        &self.binder
    }

    pub fn executions(&self) -> &Arc<ExecutionManager> {
        &self.executions
    }

    pub fn simulated_runtime(&self) -> Option<Arc<SimulatedRuntime>> {
        self.simulated.read().clone()
    }

    /// Runtime types with a live instance
    pub fn available_runtimes(&self) -> Vec<RuntimeType> {
        let mut types: Vec<RuntimeType> = self.runtimes.iter().map(|r| *r.key()).collect();
        types.sort();
        types
    }

    pub fn get_runtime(&self, runtime_type: RuntimeType) -> Option<Arc<dyn Runtime>> {
        self.runtimes.get(&runtime_type).map(|r| Arc::clone(r.value()))
    }

    // ========== Device Operations ==========

    /// Run discovery and infer capabilities for new devices
    pub async fn detect_devices(&self) -> Result<Vec<Device>> {
        Ok(self.devices.detect_devices().await?)
    }

    pub fn list_devices(&self) -> Vec<Device> {
        self.devices.list_devices()
    }

    pub fn get_device_capabilities(&self, device_id: &DeviceId) -> Result<DeviceCapabilities> {
        Ok(self.devices.get_device_capabilities(device_id)?)
    }

    pub async fn connect(&self, device_id: &DeviceId) -> Result<DeviceConnection> {
        let config = tether_types::ConnectionConfig::with_baud_rate(self.config.connection.default_baud_rate);
        Ok(self.devices.connect_to_device(device_id, config).await?)
    }

    pub async fn disconnect(&self, device_id: &DeviceId) -> Result<()> {
        Ok(self.devices.disconnect_device(device_id).await?)
    }

    pub fn is_connected(&self, device_id: &DeviceId) -> bool {
        self.devices.is_device_connected(device_id)
    }

    fn device(&self, device_id: &DeviceId) -> Result<Device> {
        self.connections
            .get_device(device_id)
            .ok_or_else(|| DeviceError::DeviceNotFound(device_id.clone()).into())
    }

    // ========== Selection ==========

    /// Choose the best registered runtime for a device
    ///
    /// Falls back to the flagship runtime whenever the policy cannot decide.
    #[instrument(skip(self, preferences))]
    pub fn select_best_runtime(
        &self,
        device_id: &DeviceId,
        preferences: &SelectionPreferences,
    ) -> Result<SelectionResult> {
        let device = self.device(device_id)?;
        let capabilities = self.devices.get_device_capabilities(device_id)?;

        let mut candidates: Vec<RuntimeCandidate> = self
            .runtimes
            .iter()
            .map(|r| RuntimeCandidate::new(r.value().info()))
            .collect();
        candidates.sort_by_key(|c| c.runtime_type);

        match self
            .policy
            .select_best_runtime(&candidates, &device, &capabilities, preferences)
        {
            Ok(selection) => Ok(selection),
            Err(e) if self.runtimes.contains_key(&RuntimeType::FLAGSHIP) => {
                warn!(device_id = %device_id, error = %e, "Selection failed, using flagship runtime");
                let strategy = preferences
                    .fallback_strategy
                    .unwrap_or(self.policy.config().fallback_strategy);
                Ok(SelectionResult::flagship_fallback(strategy, Vec::new()))
            }
            Err(e) => Err(e.into()),
        }
    }

    // ========== Binding Operations ==========

    /// The instance a device of this kind should be bound to
    fn runtime_for(&self, device: &Device, runtime_type: RuntimeType) -> Result<Arc<dyn Runtime>> {
        if device.is_virtual() {
            if let Some(simulated) = self.simulated_runtime() {
                if simulated.runtime_type() == runtime_type {
                    return Ok(simulated);
                }
            }
        }
        self.get_runtime(runtime_type)
            .ok_or(CoordinatorError::RuntimeNotRegistered(runtime_type))
    }

    /// Bind a device to a runtime type, switching any existing binding
    #[instrument(skip(self, preferences))]
    pub async fn bind_device_to_runtime(
        &self,
        device_id: &DeviceId,
        runtime_type: RuntimeType,
        preferences: BindingPreferences,
    ) -> Result<BindingRecord> {
        let device = self.device(device_id)?;
        let runtime = self.runtime_for(&device, runtime_type)?;

        let record = self
            .binder
            .bind_device_to_runtime(device_id, runtime, preferences)
            .await?;
        self.sync_abstractions(&device.id, Some(&device))?;
        Ok(record)
    }

    /// Select a runtime for a device and bind it
    ///
    /// Virtual devices go to the shared simulated runtime when it is running.
    #[instrument(skip(self, preferences))]
    pub async fn auto_bind_device(
        &self,
        device_id: &DeviceId,
        preferences: &SelectionPreferences,
    ) -> Result<BindingRecord> {
        let device = self.device(device_id)?;

        let mut binding_preferences = BindingPreferences::new();
        let runtime_type = match self.simulated_runtime().filter(|_| device.is_virtual()) {
            Some(simulated) => {
                binding_preferences.insert("selected_by".into(), serde_json::json!("simulated"));
                simulated.runtime_type()
            }
            None => {
                let selection = self.select_best_runtime(device_id, preferences)?;
                binding_preferences.insert("selected_by".into(), serde_json::json!(selection.source));
                binding_preferences.insert("strategy".into(), serde_json::json!(selection.strategy));
                binding_preferences.insert("score".into(), serde_json::json!(selection.score.total()));
                selection.runtime_type
            }
        };

        self.bind_device_to_runtime(device_id, runtime_type, binding_preferences)
            .await
    }

    /// Move a bound device to another runtime type
    #[instrument(skip(self))]
    pub async fn switch_device_runtime(
        &self,
        device_id: &DeviceId,
        runtime_type: RuntimeType,
    ) -> Result<BindingRecord> {
        let device = self.device(device_id)?;
        let runtime = self.runtime_for(&device, runtime_type)?;

        let record = self.binder.switch_device_runtime(device_id, runtime).await?;
        self.sync_abstractions(&device.id, Some(&device))?;
        Ok(record)
    }

    /// Stop any execution, remove the binding and release its hardware
    #[instrument(skip(self))]
    pub async fn unbind_device(&self, device_id: &DeviceId) -> Result<Option<BindingRecord>> {
        self.executions.interrupt_execution(device_id).await;
        let record = self.binder.unbind_device(device_id).await?;
        self.release_abstractions(device_id);
        Ok(record)
    }

    pub fn get_binding(&self, device_id: &DeviceId) -> Option<BindingRecord> {
        self.binder.get_binding(device_id)
    }

    pub fn list_bindings(&self) -> Vec<BindingRecord> {
        self.binder.list_bindings()
    }

    /// Make a device's hardware abstractions match its current binding
    ///
    /// Abstractions for any runtime type other than the bound one are
    /// unregistered. When `device` is given, the bound type's abstraction is
    /// registered if missing. Reads the binding under the sync lock, so
    /// overlapping bind, switch and unbind calls converge on the final binding.
    /// Returns the number of abstractions retired.
    fn sync_abstractions(&self, device_id: &DeviceId, device: Option<&Device>) -> Result<usize> {
        let _guard = self.abstraction_sync.lock();
        let bound = self.binder.get_binding(device_id).map(|b| b.runtime_type);

        let stale: Vec<AbstractionId> = self
            .hardware
            .list_abstractions()
            .into_iter()
            .filter(|id| {
                self.hardware
                    .get_abstraction(id)
                    .is_some_and(|a| a.device_id == *device_id && Some(a.runtime_type) != bound)
            })
            .collect();

        for id in &stale {
            if let Err(e) = self.hardware.unregister_hardware_abstraction(id) {
                warn!(abstraction_id = %id, error = %e, "Failed to unregister abstraction");
            }
        }

        if let (Some(runtime_type), Some(device)) = (bound, device) {
            let id = AbstractionId::for_binding(device_id, runtime_type);
            if self.hardware.get_abstraction(&id).is_none() {
                self.hardware.register_hardware_abstraction(
                    id,
                    device_id.clone(),
                    runtime_type,
                    device.is_virtual(),
                )?;
            }
        }
        Ok(stale.len())
    }

    /// Unregister every abstraction of a device that is no longer bound
    pub(crate) fn release_abstractions(&self, device_id: &DeviceId) -> usize {
        match self.sync_abstractions(device_id, None) {
            Ok(released) => released,
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Failed to release abstractions");
                0
            }
        }
    }

    // ========== Execution Operations ==========

    pub async fn execute_code(
        &self,
        device_id: &DeviceId,
        code: &str,
        options: ExecutionOptions,
    ) -> Result<ExecutionResult> {
        Ok(self.executions.execute_code(device_id, code, options).await?)
    }

    pub async fn execute_batch(&self, requests: Vec<ExecutionRequest>) -> Vec<BatchResult> {
        self.executions.execute_batch(requests).await
    }

    pub async fn interrupt_execution(&self, device_id: &DeviceId) -> bool {
        self.executions.interrupt_execution(device_id).await
    }

    pub fn stream_execution(
        &self,
        device_id: &DeviceId,
        code: &str,
        timeout: Option<Duration>,
    ) -> Result<BoxStream<'_, StreamEvent>> {
        Ok(self.executions.stream_execution(device_id, code, timeout)?)
    }

    pub fn get_execution_status(&self, device_id: &DeviceId) -> Option<ExecutionStatusReport> {
        self.executions.get_execution_status(device_id)
    }

    pub fn get_execution_history(&self, limit: Option<usize>) -> Vec<ExecutionResult> {
        self.executions.get_execution_history(limit)
    }

    // ========== Hardware State ==========

    pub fn get_pin_state(&self, pin: u8) -> Option<PinState> {
        self.hardware.get_pin_state(pin)
    }

    pub fn get_sensor_state(&self, sensor_id: &str) -> Option<SensorState> {
        self.hardware.get_sensor_state(sensor_id)
    }

    pub fn get_component_state(&self, component_id: &str) -> Option<ComponentState> {
        self.hardware.get_component_state(component_id)
    }

    pub fn get_hardware_state_summary(&self) -> HardwareStateSummary {
        self.hardware.get_hardware_state_summary()
    }
}
