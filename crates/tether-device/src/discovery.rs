//! Discovery contract
//!
//! A discovery source reports the devices currently present. Diffing against
//! previously known devices is done by the connection manager.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tether_types::{Device, DeviceId};

use crate::error::{DeviceError, Result};

/// Source of currently present devices
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// Enumerate devices present right now
    async fn discover(&self) -> Result<Vec<Device>>;
}

/// Discovery backed by an explicitly managed device set
///
/// Used for simulated boards and for driving discovery in tests.
#[derive(Default)]
pub struct StaticDiscovery {
    devices: RwLock<BTreeMap<DeviceId, Device>>,
    failing: AtomicBool,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let discovery = Self::new();
        for device in devices {
            discovery.insert(device);
        }
        discovery
    }

    pub fn insert(&self, device: Device) {
        self.devices.write().insert(device.id.clone(), device);
    }

    pub fn remove(&self, device_id: &DeviceId) -> Option<Device> {
        self.devices.write().remove(device_id)
    }

    /// Make subsequent enumerations fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceDiscovery for StaticDiscovery {
    async fn discover(&self) -> Result<Vec<Device>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeviceError::Discovery("enumeration failed".into()));
        }
        Ok(self.devices.read().values().cloned().collect())
    }
}
