//! Device and connection types
//!
//! A [`Device`] has an immutable identity and is owned by the connection
//! manager. A [`Connection`] tracks the transport-level link to a device; at
//! most one exists per device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::ids::DeviceId;

/// Transport protocol used to reach a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceProtocol {
    /// USB CDC / UART serial port
    Serial,
    /// Raw USB (bulk endpoints)
    Usb,
    /// Simulated board with no physical transport
    Virtual,
}

impl fmt::Display for DeviceProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProtocol::Serial => write!(f, "serial"),
            DeviceProtocol::Usb => write!(f, "usb"),
            DeviceProtocol::Virtual => write!(f, "virtual"),
        }
    }
}

/// A discovered device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Stable identifier (usually the port path or board serial)
    pub id: DeviceId,

    /// Human readable name reported by discovery
    pub name: String,

    /// Primary protocol the device was discovered on
    pub protocol: DeviceProtocol,

    /// OS path of the port, if any
    pub path: Option<String>,

    /// USB vendor id
    pub vendor_id: Option<u16>,

    /// USB product id
    pub product_id: Option<u16>,

    /// Manufacturer string
    pub manufacturer: Option<String>,

    /// Serial number string
    pub serial_number: Option<String>,

    /// When discovery first reported this device
    pub discovered_at: DateTime<Utc>,
}

impl Device {
    pub fn new(id: impl Into<DeviceId>, name: impl Into<String>, protocol: DeviceProtocol) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            protocol,
            path: None,
            vendor_id: None,
            product_id: None,
            manufacturer: None,
            serial_number: None,
            discovered_at: Utc::now(),
        }
    }

    /// Create a simulated device
    pub fn virtual_device(id: impl Into<DeviceId>, name: impl Into<String>) -> Self {
        Self::new(id, name, DeviceProtocol::Virtual)
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_usb_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = Some(vendor_id);
        self.product_id = Some(product_id);
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    pub fn with_serial_number(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }

    pub fn is_virtual(&self) -> bool {
        self.protocol == DeviceProtocol::Virtual
    }
}

/// Connection lifecycle status
///
/// Valid transitions: `Disconnected -> Connecting -> {Connected | Error | Timeout}`,
/// `Connected -> {Disconnected | Error}`, and any failed state back to `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
    Timeout,
}

impl ConnectionStatus {
    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Error, Connecting)
                | (Timeout, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connecting, Timeout)
                | (Connected, Disconnected)
                | (Connected, Error)
                | (Error, Disconnected)
                | (Timeout, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Caller-supplied connection parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Override the protocol (defaults to the device's discovered protocol)
    pub protocol: Option<DeviceProtocol>,

    /// Serial baud rate
    pub baud_rate: Option<u32>,

    /// Connection attempt timeout
    pub timeout: Option<Duration>,
}

impl ConnectionConfig {
    pub fn with_baud_rate(baud_rate: u32) -> Self {
        Self {
            baud_rate: Some(baud_rate),
            ..Default::default()
        }
    }
}

/// Parameters a transport reports back after opening a link
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportParams {
    pub path: Option<String>,
    pub baud_rate: Option<u32>,
    pub extra: BTreeMap<String, String>,
}

/// Transport-level connection to a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub device_id: DeviceId,
    pub protocol: DeviceProtocol,
    pub status: ConnectionStatus,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub params: TransportParams,
}

impl Connection {
    pub fn new(device_id: DeviceId, protocol: DeviceProtocol) -> Self {
        Self {
            device_id,
            protocol,
            status: ConnectionStatus::Disconnected,
            connected_at: None,
            last_activity: None,
            error: None,
            params: TransportParams::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use ConnectionStatus::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Error));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
    }

    #[test]
    fn test_virtual_device() {
        let device = Device::virtual_device("sim-1", "Simulated Feather");
        assert!(device.is_virtual());
        assert_eq!(device.id.as_str(), "sim-1");
    }
}
