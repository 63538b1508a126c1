//! Device-event reactor
//!
//! Keeps bindings in step with discovery: newly discovered devices are
//! auto-bound, lost devices are interrupted, unbound and forgotten.
//!
//! The event bus drops messages for slow receivers. When the reactor lags it
//! reconciles bindings against the connection manager's device set instead.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use tether_selection::SelectionPreferences;
use tether_types::{Device, DeviceId, TetherEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::RuntimeCoordinator;

/// Subscribe immediately, then react on a background task
pub(crate) fn spawn(coordinator: &Arc<RuntimeCoordinator>, shutdown: CancellationToken) -> JoinHandle<()> {
    let mut rx = coordinator.subscribe();
    let coordinator: Weak<RuntimeCoordinator> = Arc::downgrade(coordinator);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = rx.recv() => {
                    let envelope = match received {
                        Ok(envelope) => envelope,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Device reactor fell behind the event stream, reconciling");
                            let Some(coordinator) = coordinator.upgrade() else { break };
                            coordinator.reconcile_devices().await;
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };
                    let Some(coordinator) = coordinator.upgrade() else { break };

                    match envelope.event {
                        TetherEvent::DeviceDiscovered { device } => coordinator.on_device_discovered(device).await,
                        TetherEvent::DeviceLost { device_id } => coordinator.on_device_lost(&device_id).await,
                        _ => {}
                    }
                }
            }
        }
        debug!("Device reactor stopped");
    })
}

impl RuntimeCoordinator {
    /// Bring bindings in line with the currently known devices
    ///
    /// Bindings of devices discovery no longer reports are torn down; known
    /// devices without a binding are auto-bound when enabled.
    pub async fn reconcile_devices(&self) {
        let known: BTreeMap<DeviceId, Device> = self
            .connection_manager()
            .known_devices()
            .into_iter()
            .map(|device| (device.id.clone(), device))
            .collect();

        for binding in self.binder.list_bindings() {
            if !known.contains_key(&binding.device_id) {
                self.on_device_lost(&binding.device_id).await;
            }
        }

        for device in known.into_values() {
            self.on_device_discovered(device).await;
        }
    }

    async fn on_device_discovered(&self, device: Device) {
        if !self.config.auto_bind || self.binder.is_bound(&device.id) {
            return;
        }

        match self
            .auto_bind_device(&device.id, &SelectionPreferences::default())
            .await
        {
            Ok(record) => {
                info!(device_id = %device.id, runtime = %record.runtime_type, "Device auto-bound")
            }
            Err(e) => warn!(device_id = %device.id, error = %e, "Auto-bind failed"),
        }
    }

    async fn on_device_lost(&self, device_id: &DeviceId) {
        match self.unbind_device(device_id).await {
            Ok(Some(_)) => info!(device_id = %device_id, "Released binding of lost device"),
            Ok(None) => debug!(device_id = %device_id, "Lost device had no binding"),
            Err(e) => warn!(device_id = %device_id, error = %e, "Failed to release lost device"),
        }
        self.device_manager().forget_device(device_id);
    }
}
