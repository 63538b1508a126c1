//! Runtime binder

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tether_types::{DeviceId, EventBus, EventSource, Runtime, RuntimeType, TetherEvent};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::binding::{BindingPreferences, BindingRecord, RuntimeBinding};
use crate::error::{BindingError, Result};
use crate::store::{BindingStore, InMemoryBindingStore};

/// Owns the device to runtime association
pub struct RuntimeBinder {
    bindings: DashMap<DeviceId, RuntimeBinding>,
    store: Arc<dyn BindingStore>,
    events: EventBus,

    /// Serializes bind/switch/unbind so each device has exactly one binding
    op_lock: Mutex<()>,
}

impl RuntimeBinder {
    pub fn new(events: EventBus) -> Self {
        Self::with_store(events, Arc::new(InMemoryBindingStore::new()))
    }

    pub fn with_store(events: EventBus, store: Arc<dyn BindingStore>) -> Self {
        Self {
            bindings: DashMap::new(),
            store,
            events,
            op_lock: Mutex::new(()),
        }
    }

    /// Bind a device to a runtime
    ///
    /// An existing binding is switched rather than duplicated.
    #[instrument(skip(self, runtime, preferences), fields(runtime = %runtime.runtime_type()))]
    pub async fn bind_device_to_runtime(
        &self,
        device_id: &DeviceId,
        runtime: Arc<dyn Runtime>,
        preferences: BindingPreferences,
    ) -> Result<BindingRecord> {
        let _guard = self.op_lock.lock().await;

        if self.bindings.contains_key(device_id) {
            debug!(device_id = %device_id, "Device already bound, switching");
            return self.switch_locked(device_id, runtime).await;
        }

        let runtime_type = runtime.runtime_type();
        let record = BindingRecord::new(device_id.clone(), runtime_type, preferences);
        self.bindings.insert(
            device_id.clone(),
            RuntimeBinding {
                record: record.clone(),
                runtime: Arc::clone(&runtime),
            },
        );

        Self::connect_hook(runtime.as_ref(), device_id).await;
        self.persist(&record).await;

        info!(device_id = %device_id, runtime = %runtime_type, "Runtime bound");
        self.events.emit(
            EventSource::Binding,
            TetherEvent::RuntimeBound {
                device_id: device_id.clone(),
                runtime_type,
            },
        );
        Ok(record)
    }

    /// Switch a bound device to another runtime
    #[instrument(skip(self, runtime), fields(runtime = %runtime.runtime_type()))]
    pub async fn switch_device_runtime(
        &self,
        device_id: &DeviceId,
        runtime: Arc<dyn Runtime>,
    ) -> Result<BindingRecord> {
        let _guard = self.op_lock.lock().await;
        self.switch_locked(device_id, runtime).await
    }

    async fn switch_locked(&self, device_id: &DeviceId, runtime: Arc<dyn Runtime>) -> Result<BindingRecord> {
        let current = self
            .bindings
            .get(device_id)
            .map(|b| b.clone())
            .ok_or_else(|| BindingError::NotBound(device_id.clone()))?;

        let new_type = runtime.runtime_type();
        if current.record.runtime_type == new_type {
            debug!(device_id = %device_id, runtime = %new_type, "Already bound to runtime");
            return Ok(current.record);
        }

        Self::disconnect_hook(current.runtime.as_ref(), device_id).await;

        let record = current.record.switched_to(new_type);
        self.bindings.insert(
            device_id.clone(),
            RuntimeBinding {
                record: record.clone(),
                runtime: Arc::clone(&runtime),
            },
        );

        Self::connect_hook(runtime.as_ref(), device_id).await;
        self.persist(&record).await;

        info!(
            device_id = %device_id,
            from = %current.record.runtime_type,
            to = %new_type,
            "Runtime switched"
        );
        self.events.emit(
            EventSource::Binding,
            TetherEvent::RuntimeSwitched {
                device_id: device_id.clone(),
                from: current.record.runtime_type,
                to: new_type,
            },
        );
        Ok(record)
    }

    /// Remove a device's binding. No-op if the device is unbound.
    #[instrument(skip(self))]
    pub async fn unbind_device(&self, device_id: &DeviceId) -> Result<Option<BindingRecord>> {
        let _guard = self.op_lock.lock().await;

        let Some((_, binding)) = self.bindings.remove(device_id) else {
            return Ok(None);
        };

        Self::disconnect_hook(binding.runtime.as_ref(), device_id).await;
        if let Err(e) = self.store.remove(device_id).await {
            warn!(device_id = %device_id, error = %e, "Failed to remove binding record");
        }

        info!(device_id = %device_id, runtime = %binding.record.runtime_type, "Runtime unbound");
        self.events.emit(
            EventSource::Binding,
            TetherEvent::RuntimeUnbound {
                device_id: device_id.clone(),
                runtime_type: binding.record.runtime_type,
            },
        );
        Ok(Some(binding.record))
    }

    async fn connect_hook(runtime: &dyn Runtime, device_id: &DeviceId) {
        if let Some(hooks) = runtime.device_hooks() {
            if let Err(e) = hooks.connect_to_device(device_id).await {
                warn!(
                    device_id = %device_id,
                    runtime = %runtime.runtime_type(),
                    error = %e,
                    "Runtime connect hook failed, keeping binding"
                );
            }
        }
    }

    async fn disconnect_hook(runtime: &dyn Runtime, device_id: &DeviceId) {
        if let Some(hooks) = runtime.device_hooks() {
            if let Err(e) = hooks.disconnect_from_device(device_id).await {
                warn!(
                    device_id = %device_id,
                    runtime = %runtime.runtime_type(),
                    error = %e,
                    "Runtime disconnect hook failed"
                );
            }
        }
    }

    async fn persist(&self, record: &BindingRecord) {
        if let Err(e) = self.store.save(record).await {
            warn!(device_id = %record.device_id, error = %e, "Failed to persist binding record");
        }
    }

    pub fn get_binding(&self, device_id: &DeviceId) -> Option<BindingRecord> {
        self.bindings.get(device_id).map(|b| b.record.clone())
    }

    pub fn get_runtime(&self, device_id: &DeviceId) -> Option<Arc<dyn Runtime>> {
        self.bindings.get(device_id).map(|b| Arc::clone(&b.runtime))
    }

    /// The bound runtime, or `NotBound`
    pub fn bound_runtime(&self, device_id: &DeviceId) -> Result<Arc<dyn Runtime>> {
        self.get_runtime(device_id)
            .ok_or_else(|| BindingError::NotBound(device_id.clone()))
    }

    pub fn is_bound(&self, device_id: &DeviceId) -> bool {
        self.bindings.contains_key(device_id)
    }

    pub fn list_bindings(&self) -> Vec<BindingRecord> {
        let mut records: Vec<BindingRecord> =
            self.bindings.iter().map(|b| b.record.clone()).collect();
        records.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        records
    }

    /// Devices currently bound to `runtime_type`
    pub fn bindings_for_runtime(&self, runtime_type: RuntimeType) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self
            .bindings
            .iter()
            .filter(|b| b.record.runtime_type == runtime_type)
            .map(|b| b.key().clone())
            .collect();
        devices.sort();
        devices
    }

    /// Refresh a binding's activity timestamp
    pub fn touch(&self, device_id: &DeviceId) -> bool {
        match self.bindings.get_mut(device_id) {
            Some(mut binding) => {
                binding.record.last_activity = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Binding metadata from the store, for re-acquiring runtimes after a restart
    pub async fn persisted_bindings(&self) -> Result<Vec<BindingRecord>> {
        self.store.load_all().await
    }

    /// Unbind every device idle for longer than `max_age`
    ///
    /// Returns the unbound device ids.
    #[instrument(skip(self))]
    pub async fn cleanup_stale_bindings(&self, max_age: Duration) -> Vec<DeviceId> {
        let now = Utc::now();
        let stale: Vec<DeviceId> = self
            .bindings
            .iter()
            .filter(|b| {
                (now - b.record.last_activity)
                    .to_std()
                    .map(|idle| idle > max_age)
                    .unwrap_or(false)
            })
            .map(|b| b.key().clone())
            .collect();

        let mut removed = Vec::with_capacity(stale.len());
        for device_id in stale {
            match self.unbind_device(&device_id).await {
                Ok(Some(_)) => removed.push(device_id),
                Ok(None) => {}
                Err(e) => warn!(device_id = %device_id, error = %e, "Failed to unbind stale device"),
            }
        }

        if !removed.is_empty() {
            info!(count = removed.len(), "Cleaned up stale bindings");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tether_types::{
        DeviceHooks, ExecutionContext, RuntimeError, RuntimeExecutionResult, RuntimeInfo,
        TetherEventEnvelope,
    };
    use tokio::sync::broadcast;

    struct HookedRuntime {
        runtime_type: RuntimeType,
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        fail_hooks: AtomicBool,
    }

    impl HookedRuntime {
        fn new(runtime_type: RuntimeType) -> Arc<Self> {
            Arc::new(Self {
                runtime_type,
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
                fail_hooks: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Runtime for HookedRuntime {
        fn runtime_type(&self) -> RuntimeType {
            self.runtime_type
        }

        fn info(&self) -> RuntimeInfo {
            RuntimeInfo::new(self.runtime_type, "test")
        }

        async fn initialize(&self) -> std::result::Result<(), RuntimeError> {
            Ok(())
        }

        async fn dispose(&self) -> std::result::Result<(), RuntimeError> {
            Ok(())
        }

        fn is_ready(&self) -> bool {
            true
        }

        async fn execute_code(
            &self,
            _code: &str,
            _ctx: &ExecutionContext,
        ) -> std::result::Result<RuntimeExecutionResult, RuntimeError> {
            Ok(RuntimeExecutionResult::ok(""))
        }

        fn device_hooks(&self) -> Option<&dyn DeviceHooks> {
            Some(self)
        }
    }

    #[async_trait]
    impl DeviceHooks for HookedRuntime {
        async fn connect_to_device(&self, device_id: &DeviceId) -> std::result::Result<(), RuntimeError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_hooks.load(Ordering::SeqCst) {
                return Err(RuntimeError::Device {
                    device_id: device_id.clone(),
                    reason: "port busy".into(),
                });
            }
            Ok(())
        }

        async fn disconnect_from_device(&self, _device_id: &DeviceId) -> std::result::Result<(), RuntimeError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            if self.fail_hooks.load(Ordering::SeqCst) {
                return Err(RuntimeError::Unavailable("gone".into()));
            }
            Ok(())
        }
    }

    fn drain(rx: &mut broadcast::Receiver<TetherEventEnvelope>) -> Vec<TetherEvent> {
        let mut events = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            events.push(envelope.event);
        }
        events
    }

    #[tokio::test]
    async fn test_bind_and_unbind() {
        let binder = RuntimeBinder::new(EventBus::new());
        let mut rx = binder.events.subscribe();
        let device = DeviceId::new("d1");
        let cp = HookedRuntime::new(RuntimeType::CircuitPython);

        let record = binder
            .bind_device_to_runtime(&device, cp.clone(), BindingPreferences::new())
            .await
            .unwrap();
        assert_eq!(record.runtime_type, RuntimeType::CircuitPython);
        assert_eq!(cp.connects.load(Ordering::SeqCst), 1);
        assert!(binder.is_bound(&device));

        let removed = binder.unbind_device(&device).await.unwrap();
        assert!(removed.is_some());
        assert_eq!(cp.disconnects.load(Ordering::SeqCst), 1);
        assert!(binder.bound_runtime(&device).is_err());

        // Unbinding again is a no-op
        assert!(binder.unbind_device(&device).await.unwrap().is_none());

        let events = drain(&mut rx);
        assert!(matches!(events[0], TetherEvent::RuntimeBound { .. }));
        assert!(matches!(events[1], TetherEvent::RuntimeUnbound { .. }));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_second_bind_switches() {
        let binder = RuntimeBinder::new(EventBus::new());
        let device = DeviceId::new("d1");
        let cp = HookedRuntime::new(RuntimeType::CircuitPython);
        let mp = HookedRuntime::new(RuntimeType::MicroPython);

        let prefs = BindingPreferences::from([("auto".to_string(), serde_json::json!(true))]);
        binder
            .bind_device_to_runtime(&device, cp.clone(), prefs.clone())
            .await
            .unwrap();
        let mut rx = binder.events.subscribe();
        let record = binder
            .bind_device_to_runtime(&device, mp.clone(), BindingPreferences::new())
            .await
            .unwrap();

        assert_eq!(binder.list_bindings().len(), 1);
        assert_eq!(record.runtime_type, RuntimeType::MicroPython);
        assert_eq!(record.previous_runtime(), Some(RuntimeType::CircuitPython));
        assert_eq!(record.preferences, prefs);
        assert_eq!(cp.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(mp.connects.load(Ordering::SeqCst), 1);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [TetherEvent::RuntimeSwitched {
                from: RuntimeType::CircuitPython,
                to: RuntimeType::MicroPython,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn test_switch_to_same_type_is_noop() {
        let binder = RuntimeBinder::new(EventBus::new());
        let device = DeviceId::new("d1");
        let cp = HookedRuntime::new(RuntimeType::CircuitPython);

        let first = binder
            .bind_device_to_runtime(&device, cp.clone(), BindingPreferences::new())
            .await
            .unwrap();
        let mut rx = binder.events.subscribe();
        let second = binder.switch_device_runtime(&device, cp.clone()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(cp.connects.load(Ordering::SeqCst), 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_switch_unbound_device() {
        let binder = RuntimeBinder::new(EventBus::new());
        let err = binder
            .switch_device_runtime(&DeviceId::new("d1"), HookedRuntime::new(RuntimeType::Python))
            .await
            .unwrap_err();
        assert!(matches!(err, BindingError::NotBound(_)));
    }

    #[tokio::test]
    async fn test_failing_hooks_keep_binding() {
        let binder = RuntimeBinder::new(EventBus::new());
        let device = DeviceId::new("d1");
        let cp = HookedRuntime::new(RuntimeType::CircuitPython);
        cp.fail_hooks.store(true, Ordering::SeqCst);

        binder
            .bind_device_to_runtime(&device, cp.clone(), BindingPreferences::new())
            .await
            .unwrap();
        assert!(binder.is_bound(&device));

        binder
            .switch_device_runtime(&device, HookedRuntime::new(RuntimeType::MicroPython))
            .await
            .unwrap();
        assert_eq!(
            binder.get_binding(&device).map(|b| b.runtime_type),
            Some(RuntimeType::MicroPython)
        );
    }

    #[tokio::test]
    async fn test_exactly_one_binding_after_many_operations() {
        let binder = Arc::new(RuntimeBinder::new(EventBus::new()));
        let device = DeviceId::new("d1");

        let mut handles = Vec::new();
        for i in 0..12 {
            let binder = binder.clone();
            let device = device.clone();
            handles.push(tokio::spawn(async move {
                let runtime = HookedRuntime::new(RuntimeType::ALL[i % 3]);
                binder
                    .bind_device_to_runtime(&device, runtime, BindingPreferences::new())
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(binder.list_bindings().len(), 1);
        assert!(binder.get_runtime(&device).is_some());
    }

    #[tokio::test]
    async fn test_cleanup_stale_bindings() {
        let binder = RuntimeBinder::new(EventBus::new());
        let idle = DeviceId::new("idle");
        let busy = DeviceId::new("busy");
        binder
            .bind_device_to_runtime(&idle, HookedRuntime::new(RuntimeType::CircuitPython), BindingPreferences::new())
            .await
            .unwrap();
        binder
            .bind_device_to_runtime(&busy, HookedRuntime::new(RuntimeType::CircuitPython), BindingPreferences::new())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(binder.touch(&busy));

        let removed = binder.cleanup_stale_bindings(Duration::from_millis(25)).await;
        assert_eq!(removed, vec![idle.clone()]);
        assert!(binder.is_bound(&busy));
        assert!(!binder.is_bound(&idle));
        assert_eq!(binder.bindings_for_runtime(RuntimeType::CircuitPython), vec![busy]);
    }

    #[tokio::test]
    async fn test_only_metadata_is_persisted() {
        let store = Arc::new(InMemoryBindingStore::new());
        let binder = RuntimeBinder::with_store(EventBus::new(), store.clone());
        let device = DeviceId::new("d1");

        binder
            .bind_device_to_runtime(&device, HookedRuntime::new(RuntimeType::Python), BindingPreferences::new())
            .await
            .unwrap();
        let persisted = binder.persisted_bindings().await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].runtime_type, RuntimeType::Python);

        binder.unbind_device(&device).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
