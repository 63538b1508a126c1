//! Transport contract and the virtual transport
//!
//! A transport performs protocol-specific link setup, teardown and liveness
//! pings. Byte-level I/O stays behind this trait.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::time::Duration;
use tether_types::{ConnectionConfig, Device, DeviceId, DeviceProtocol, TransportParams};
use thiserror::Error;

/// Errors reported by a transport
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("{0}")]
    Failed(String),

    #[error("device unreachable")]
    Unreachable,
}

/// Protocol-specific link management
#[async_trait]
pub trait Transport: Send + Sync {
    /// Protocol this transport serves
    fn protocol(&self) -> DeviceProtocol;

    /// Open a link to the device
    async fn connect(
        &self,
        device: &Device,
        config: &ConnectionConfig,
    ) -> Result<TransportParams, TransportError>;

    /// Close the link
    async fn disconnect(&self, device_id: &DeviceId) -> Result<(), TransportError>;

    /// Check the link is alive
    async fn ping(&self, device_id: &DeviceId) -> Result<(), TransportError>;
}

/// Transport for simulated boards
///
/// Always succeeds unless a device has been marked failing (connect) or
/// unreachable (ping). An optional latency is applied to `connect`.
#[derive(Default)]
pub struct VirtualTransport {
    latency: Option<Duration>,
    failing: RwLock<HashSet<DeviceId>>,
    unreachable: RwLock<HashSet<DeviceId>>,
    open: RwLock<HashSet<DeviceId>>,
}

impl VirtualTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Make future connection attempts to `device_id` fail
    pub fn set_failing(&self, device_id: &DeviceId, failing: bool) {
        let mut set = self.failing.write();
        if failing {
            set.insert(device_id.clone());
        } else {
            set.remove(device_id);
        }
    }

    /// Whether a link to `device_id` is open
    pub fn is_open(&self, device_id: &DeviceId) -> bool {
        self.open.read().contains(device_id)
    }

    /// Make future pings to `device_id` fail
    pub fn set_reachable(&self, device_id: &DeviceId, reachable: bool) {
        let mut set = self.unreachable.write();
        if reachable {
            set.remove(device_id);
        } else {
            set.insert(device_id.clone());
        }
    }
}

#[async_trait]
impl Transport for VirtualTransport {
    fn protocol(&self) -> DeviceProtocol {
        DeviceProtocol::Virtual
    }

    async fn connect(
        &self,
        device: &Device,
        config: &ConnectionConfig,
    ) -> Result<TransportParams, TransportError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.failing.read().contains(&device.id) {
            return Err(TransportError::Failed(format!(
                "simulated board {} refused the connection",
                device.id
            )));
        }

        let mut params = TransportParams {
            path: device.path.clone(),
            baud_rate: config.baud_rate,
            ..Default::default()
        };
        params.extra.insert("simulated".into(), "true".into());
        self.open.write().insert(device.id.clone());
        Ok(params)
    }

    async fn disconnect(&self, device_id: &DeviceId) -> Result<(), TransportError> {
        self.open.write().remove(device_id);
        Ok(())
    }

    async fn ping(&self, device_id: &DeviceId) -> Result<(), TransportError> {
        if self.unreachable.read().contains(device_id) {
            return Err(TransportError::Unreachable);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_virtual_connect_and_ping() {
        let transport = VirtualTransport::new();
        let device = Device::virtual_device("sim-1", "Simulated Feather");

        let params = transport
            .connect(&device, &ConnectionConfig::with_baud_rate(9600))
            .await
            .unwrap();
        assert_eq!(params.baud_rate, Some(9600));
        assert!(transport.ping(&device.id).await.is_ok());

        transport.set_reachable(&device.id, false);
        assert!(matches!(
            transport.ping(&device.id).await,
            Err(TransportError::Unreachable)
        ));
    }

    #[tokio::test]
    async fn test_virtual_connect_failure() {
        let transport = VirtualTransport::new();
        let device = Device::virtual_device("sim-2", "Simulated CLUE");
        transport.set_failing(&device.id, true);

        assert!(transport
            .connect(&device, &ConnectionConfig::default())
            .await
            .is_err());
    }
}
