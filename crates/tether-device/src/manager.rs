//! Device capability store
//!
//! Adds a runtime-independent capability and metadata layer on top of the
//! [`ConnectionManager`]. Connection calls are straight delegations; no
//! runtime type is referenced here.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tether_types::{
    CapabilitiesUpdate, Connection, ConnectionConfig, ConnectionStatus, Device,
    DeviceCapabilities, DeviceId, DeviceProtocol, EventSource, TetherEvent,
};
use tracing::{debug, instrument};

use crate::classifier::classify_device;
use crate::connection::ConnectionManager;
use crate::error::{DeviceError, Result};

/// Free-form per-device metadata
pub type DeviceMetadata = BTreeMap<String, serde_json::Value>;

/// Runtime-agnostic view of a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConnection {
    pub device_id: DeviceId,
    pub protocol: DeviceProtocol,
    pub status: ConnectionStatus,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl From<Connection> for DeviceConnection {
    fn from(conn: Connection) -> Self {
        Self {
            device_id: conn.device_id,
            protocol: conn.protocol,
            status: conn.status,
            connected_at: conn.connected_at,
            last_activity: conn.last_activity,
        }
    }
}

/// Capability and metadata store
pub struct DeviceManager {
    connections: Arc<ConnectionManager>,
    capabilities: DashMap<DeviceId, DeviceCapabilities>,
    metadata: DashMap<DeviceId, DeviceMetadata>,
}

impl DeviceManager {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self {
            connections,
            capabilities: DashMap::new(),
            metadata: DashMap::new(),
        }
    }

    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Run discovery and infer capabilities for every device not seen before
    #[instrument(skip(self))]
    pub async fn detect_devices(&self) -> Result<Vec<Device>> {
        let devices = self.connections.get_available_devices().await?;

        for device in &devices {
            if !self.capabilities.contains_key(&device.id) {
                self.compute_and_cache(device);
            }
        }

        Ok(devices)
    }

    /// Cached device snapshot, without running discovery
    pub fn list_devices(&self) -> Vec<Device> {
        self.connections.known_devices()
    }

    /// Cached capabilities, computed on first request
    pub fn get_device_capabilities(&self, device_id: &DeviceId) -> Result<DeviceCapabilities> {
        if let Some(caps) = self.capabilities.get(device_id) {
            return Ok(caps.clone());
        }

        let device = self
            .connections
            .get_device(device_id)
            .ok_or_else(|| DeviceError::DeviceNotFound(device_id.clone()))?;
        Ok(self.compute_and_cache(&device))
    }

    fn compute_and_cache(&self, device: &Device) -> DeviceCapabilities {
        let caps = classify_device(device);
        debug!(
            device_id = %device.id,
            family = ?caps.board_family,
            features = caps.features.len(),
            "Inferred device capabilities"
        );
        self.capabilities.insert(device.id.clone(), caps.clone());
        self.emit_updated(&device.id);
        caps
    }

    /// Merge a partial capability update. Later writes win.
    #[instrument(skip(self, update))]
    pub fn update_device_capabilities(
        &self,
        device_id: &DeviceId,
        update: CapabilitiesUpdate,
    ) -> Result<DeviceCapabilities> {
        let mut caps = self.get_device_capabilities(device_id)?;
        caps.apply(&update);
        self.capabilities.insert(device_id.clone(), caps.clone());
        self.emit_updated(device_id);
        Ok(caps)
    }

    /// Merge metadata entries into the device's metadata map
    pub fn update_device_metadata(
        &self,
        device_id: &DeviceId,
        entries: DeviceMetadata,
    ) -> Result<DeviceMetadata> {
        if self.connections.get_device(device_id).is_none()
            && !self.capabilities.contains_key(device_id)
        {
            return Err(DeviceError::DeviceNotFound(device_id.clone()));
        }

        let mut metadata = self.metadata.entry(device_id.clone()).or_default();
        metadata.extend(entries);
        Ok(metadata.clone())
    }

    pub fn get_device_metadata(&self, device_id: &DeviceId) -> Option<DeviceMetadata> {
        self.metadata.get(device_id).map(|m| m.clone())
    }

    /// Drop cached capabilities and metadata for a device
    pub fn forget_device(&self, device_id: &DeviceId) {
        self.capabilities.remove(device_id);
        self.metadata.remove(device_id);
    }

    fn emit_updated(&self, device_id: &DeviceId) {
        self.connections.events().emit(
            EventSource::Device,
            TetherEvent::CapabilitiesUpdated {
                device_id: device_id.clone(),
            },
        );
    }

    pub async fn connect_to_device(
        &self,
        device_id: &DeviceId,
        config: ConnectionConfig,
    ) -> Result<DeviceConnection> {
        self.connections
            .connect_to_device(device_id, config)
            .await
            .map(DeviceConnection::from)
    }

    pub async fn disconnect_device(&self, device_id: &DeviceId) -> Result<()> {
        self.connections.disconnect_device(device_id).await
    }

    pub fn is_device_connected(&self, device_id: &DeviceId) -> bool {
        self.connections.is_device_connected(device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionManagerConfig;
    use crate::discovery::StaticDiscovery;
    use crate::transport::VirtualTransport;
    use tether_types::{Capability, EventBus};

    async fn manager_with(devices: Vec<Device>) -> DeviceManager {
        let discovery = Arc::new(StaticDiscovery::with_devices(devices));
        let connections = Arc::new(ConnectionManager::new(
            ConnectionManagerConfig::default(),
            discovery,
            EventBus::new(),
        ));
        connections.register_transport(Arc::new(VirtualTransport::new()));
        DeviceManager::new(connections)
    }

    #[tokio::test]
    async fn test_detect_devices_caches_capabilities() {
        let manager = manager_with(vec![Device::new(
            "tty0",
            "Adafruit Feather ESP32",
            DeviceProtocol::Serial,
        )])
        .await;

        let devices = manager.detect_devices().await.unwrap();
        assert_eq!(devices.len(), 1);

        let caps = manager
            .get_device_capabilities(&DeviceId::new("tty0"))
            .unwrap();
        assert!(caps.has(Capability::Wifi));
    }

    #[tokio::test]
    async fn test_unknown_device_capabilities() {
        let manager = manager_with(vec![]).await;
        let err = manager
            .get_device_capabilities(&DeviceId::new("nope"))
            .unwrap_err();
        assert!(matches!(err, DeviceError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn test_capability_update_last_write_wins() {
        let manager = manager_with(vec![Device::virtual_device("sim", "Sim")]).await;
        manager.detect_devices().await.unwrap();
        let id = DeviceId::new("sim");

        manager
            .update_device_capabilities(&id, CapabilitiesUpdate::default().add(Capability::Wifi))
            .unwrap();
        let caps = manager
            .update_device_capabilities(
                &id,
                CapabilitiesUpdate {
                    baud_rate: Some(9600),
                    ..Default::default()
                }
                .remove(Capability::Wifi),
            )
            .unwrap();

        assert!(!caps.has(Capability::Wifi));
        assert_eq!(caps.baud_rate, 9600);
    }

    #[tokio::test]
    async fn test_metadata_merge_and_forget() {
        let manager = manager_with(vec![Device::virtual_device("sim", "Sim")]).await;
        manager.detect_devices().await.unwrap();
        let id = DeviceId::new("sim");

        manager
            .update_device_metadata(
                &id,
                BTreeMap::from([("label".to_string(), serde_json::json!("bench"))]),
            )
            .unwrap();
        let merged = manager
            .update_device_metadata(
                &id,
                BTreeMap::from([("label".to_string(), serde_json::json!("desk"))]),
            )
            .unwrap();
        assert_eq!(merged["label"], serde_json::json!("desk"));

        manager.forget_device(&id);
        assert!(manager.get_device_metadata(&id).is_none());
    }

    #[tokio::test]
    async fn test_connection_delegation() {
        let manager = manager_with(vec![Device::virtual_device("sim", "Sim")]).await;
        manager.detect_devices().await.unwrap();
        let id = DeviceId::new("sim");

        let conn = manager
            .connect_to_device(&id, ConnectionConfig::default())
            .await
            .unwrap();
        assert_eq!(conn.status, ConnectionStatus::Connected);
        assert!(manager.is_device_connected(&id));

        manager.disconnect_device(&id).await.unwrap();
        assert!(!manager.is_device_connected(&id));
    }
}
