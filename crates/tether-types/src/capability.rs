//! Device capability model
//!
//! Capabilities are computed once per newly seen device and cached by the
//! capability store. Updates are last-write-wins merges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::device::DeviceProtocol;
use crate::ids::DeviceId;

/// A hardware feature flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Wifi,
    Bluetooth,
    /// Native USB (the board enumerates itself)
    NativeUsb,
    Display,
    /// Mass-storage filesystem exposed to the host
    FileSystem,
    /// Interactive REPL over the serial console
    Repl,
    /// Code reload on file change
    HotReload,
    Audio,
    Neopixel,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Wifi => "wifi",
            Capability::Bluetooth => "bluetooth",
            Capability::NativeUsb => "native_usb",
            Capability::Display => "display",
            Capability::FileSystem => "file_system",
            Capability::Repl => "repl",
            Capability::HotReload => "hot_reload",
            Capability::Audio => "audio",
            Capability::Neopixel => "neopixel",
        };
        f.write_str(s)
    }
}

/// Static and inferred capabilities of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub device_id: DeviceId,

    /// Protocols the device can be reached over
    pub protocols: Vec<DeviceProtocol>,

    /// Expected serial baud rate
    pub baud_rate: u32,

    /// Feature flags
    pub features: BTreeSet<Capability>,

    /// Board family the classifier matched, if any
    pub board_family: Option<String>,

    /// When the capabilities were computed or last updated
    pub updated_at: DateTime<Utc>,
}

impl DeviceCapabilities {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            protocols: Vec::new(),
            baud_rate: 115_200,
            features: BTreeSet::new(),
            board_family: None,
            updated_at: Utc::now(),
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.features.contains(&capability)
    }

    pub fn supports_protocol(&self, protocol: DeviceProtocol) -> bool {
        self.protocols.contains(&protocol)
    }

    /// Apply a partial update. Later writes win.
    pub fn apply(&mut self, update: &CapabilitiesUpdate) {
        if let Some(protocols) = &update.protocols {
            self.protocols = protocols.clone();
        }
        if let Some(baud_rate) = update.baud_rate {
            self.baud_rate = baud_rate;
        }
        if let Some(family) = &update.board_family {
            self.board_family = Some(family.clone());
        }
        for feature in &update.add_features {
            self.features.insert(*feature);
        }
        for feature in &update.remove_features {
            self.features.remove(feature);
        }
        self.updated_at = Utc::now();
    }
}

/// Partial capability update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilitiesUpdate {
    pub protocols: Option<Vec<DeviceProtocol>>,
    pub baud_rate: Option<u32>,
    pub board_family: Option<String>,
    #[serde(default)]
    pub add_features: BTreeSet<Capability>,
    #[serde(default)]
    pub remove_features: BTreeSet<Capability>,
}

impl CapabilitiesUpdate {
    pub fn add(mut self, capability: Capability) -> Self {
        self.add_features.insert(capability);
        self
    }

    pub fn remove(mut self, capability: Capability) -> Self {
        self.remove_features.insert(capability);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_update() {
        let mut caps = DeviceCapabilities::new(DeviceId::new("d1"));
        caps.features.insert(Capability::Repl);

        let update = CapabilitiesUpdate {
            baud_rate: Some(9600),
            ..Default::default()
        }
        .add(Capability::Wifi)
        .remove(Capability::Repl);

        caps.apply(&update);
        assert_eq!(caps.baud_rate, 9600);
        assert!(caps.has(Capability::Wifi));
        assert!(!caps.has(Capability::Repl));
    }
}
