//! Runtime health snapshot and monitor loop

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_types::{DeviceId, EventSource, RuntimeType, TetherEvent};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::RuntimeCoordinator;

/// Last observed health of one runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeHealth {
    pub runtime_type: RuntimeType,
    pub version: String,

    /// `false` after the liveness flag flipped off, until it recovers
    pub responsive: bool,
    pub bound_devices: usize,
    pub last_checked: DateTime<Utc>,
}

impl RuntimeHealth {
    pub(crate) fn new(runtime_type: RuntimeType, version: String, responsive: bool) -> Self {
        Self {
            runtime_type,
            version,
            responsive,
            bound_devices: 0,
            last_checked: Utc::now(),
        }
    }
}

impl RuntimeCoordinator {
    /// Last observed health of every live runtime, flagship first
    pub fn runtime_health(&self) -> Vec<RuntimeHealth> {
        let mut health: Vec<RuntimeHealth> = self.health.iter().map(|h| h.value().clone()).collect();
        health.sort_by_key(|h| h.runtime_type);
        health
    }

    /// Poll every runtime's liveness flag once
    ///
    /// A runtime whose flag flips off is marked unresponsive with a
    /// `HealthWarning`; flipping back on emits `RuntimeRecovered`.
    pub fn check_runtime_health(&self) -> Vec<RuntimeHealth> {
        let runtimes: Vec<_> = self
            .runtimes
            .iter()
            .map(|r| (*r.key(), Arc::clone(r.value())))
            .collect();

        for (runtime_type, runtime) in runtimes {
            let ready = runtime.is_ready();
            let was_responsive = self
                .health
                .get(&runtime_type)
                .map(|h| h.responsive)
                .unwrap_or(true);

            if was_responsive && !ready {
                warn!(runtime = %runtime_type, "Runtime became unresponsive");
                self.events.emit(
                    EventSource::Coordinator,
                    TetherEvent::HealthWarning {
                        runtime_type,
                        message: "runtime is no longer responsive".to_string(),
                    },
                );
            } else if !was_responsive && ready {
                info!(runtime = %runtime_type, "Runtime recovered");
                self.events
                    .emit(EventSource::Coordinator, TetherEvent::RuntimeRecovered { runtime_type });
            }

            let mut entry = RuntimeHealth::new(runtime_type, runtime.info().version, ready);
            entry.bound_devices = self.binder.bindings_for_runtime(runtime_type).len();
            self.health.insert(runtime_type, entry);
        }

        self.runtime_health()
    }

    /// Release bindings idle longer than the configured age
    pub async fn cleanup_stale_bindings(&self) -> Vec<DeviceId> {
        let max_age = self.config.health.stale_binding_max_age();
        let stale = self.binder.cleanup_stale_bindings(max_age).await;
        for device_id in &stale {
            let released = self.release_abstractions(device_id);
            debug!(device_id = %device_id, released, "Released stale binding");
        }
        stale
    }

    /// Spawn the fixed-interval runtime health loop
    pub(crate) fn spawn_health_monitor(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let coordinator: Weak<Self> = Arc::downgrade(self);
        let period = self.config.health.interval();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(coordinator) = coordinator.upgrade() else { break };
                        coordinator.check_runtime_health();
                        let stale = coordinator.cleanup_stale_bindings().await;
                        if !stale.is_empty() {
                            info!(count = stale.len(), "Released stale bindings");
                        }
                    }
                }
            }
            debug!("Runtime health monitor stopped");
        })
    }
}
