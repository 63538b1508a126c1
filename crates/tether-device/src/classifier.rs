//! Rule-based capability classifier
//!
//! Capabilities are inferred from the device name, manufacturer string and
//! USB vendor id. Rules are checked in order and the first board rule that
//! matches wins, so more specific names must come before their prefixes.

use std::collections::BTreeSet;

use tether_types::{Capability, Device, DeviceCapabilities, DeviceProtocol};

const DEFAULT_BAUD_RATE: u32 = 115_200;

/// USB vendor ids whose boards enumerate natively
const NATIVE_USB_VENDORS: &[u16] = &[
    0x239A, // Adafruit
    0x2E8A, // Raspberry Pi
    0x303A, // Espressif (native USB parts)
];

struct BoardRule {
    family: &'static str,
    keywords: &'static [&'static str],
    features: &'static [Capability],
}

const BOARD_RULES: &[BoardRule] = &[
    BoardRule {
        family: "esp32s3",
        keywords: &["esp32-s3", "esp32s3"],
        features: &[Capability::Wifi, Capability::Bluetooth, Capability::NativeUsb],
    },
    BoardRule {
        family: "esp32s2",
        keywords: &["esp32-s2", "esp32s2", "magtag", "funhouse"],
        features: &[Capability::Wifi, Capability::NativeUsb],
    },
    BoardRule {
        family: "esp32",
        keywords: &["esp32", "huzzah32"],
        features: &[Capability::Wifi, Capability::Bluetooth],
    },
    BoardRule {
        family: "pyportal",
        keywords: &["pyportal"],
        features: &[
            Capability::Wifi,
            Capability::Display,
            Capability::Audio,
            Capability::NativeUsb,
        ],
    },
    BoardRule {
        family: "nrf52840",
        keywords: &["clue", "nrf52840", "bluefruit", "itsybitsy nrf"],
        features: &[Capability::Bluetooth, Capability::NativeUsb],
    },
    BoardRule {
        family: "rp2040",
        keywords: &["rp2040", "pico", "qt py rp"],
        features: &[Capability::NativeUsb],
    },
    BoardRule {
        family: "samd51",
        keywords: &["samd51", "m4", "pygamer", "pybadge"],
        features: &[Capability::NativeUsb],
    },
    BoardRule {
        family: "samd21",
        keywords: &["samd21", "m0", "trinket", "gemma"],
        features: &[Capability::NativeUsb],
    },
];

/// Extra features keyed by product keyword, independent of the board family
const FEATURE_KEYWORDS: &[(&str, Capability)] = &[
    ("clue", Capability::Display),
    ("magtag", Capability::Display),
    ("pygamer", Capability::Display),
    ("pybadge", Capability::Display),
    ("circuit playground", Capability::Neopixel),
    ("neopixel", Capability::Neopixel),
    ("circuit playground", Capability::Audio),
];

const VIRTUAL_KEYWORDS: &[&str] = &["virtual", "simulated", "simulator"];

/// Infer capabilities for a device
pub fn classify_device(device: &Device) -> DeviceCapabilities {
    let haystack = format!(
        "{} {}",
        device.name.to_lowercase(),
        device.manufacturer.as_deref().unwrap_or("").to_lowercase()
    );

    let mut caps = DeviceCapabilities::new(device.id.clone());
    caps.baud_rate = DEFAULT_BAUD_RATE;
    caps.features.insert(Capability::Repl);

    let is_virtual =
        device.is_virtual() || VIRTUAL_KEYWORDS.iter().any(|kw| haystack.contains(kw));
    if is_virtual {
        caps.protocols = vec![DeviceProtocol::Virtual];
        caps.board_family = Some("virtual".to_string());
        caps.features
            .extend([Capability::FileSystem, Capability::HotReload]);
        return caps;
    }

    let mut features: BTreeSet<Capability> = BTreeSet::new();

    if let Some(rule) = BOARD_RULES
        .iter()
        .find(|rule| rule.keywords.iter().any(|kw| haystack.contains(kw)))
    {
        caps.board_family = Some(rule.family.to_string());
        features.extend(rule.features.iter().copied());
    }

    for (keyword, capability) in FEATURE_KEYWORDS {
        if haystack.contains(keyword) {
            features.insert(*capability);
        }
    }

    if device
        .vendor_id
        .is_some_and(|vid| NATIVE_USB_VENDORS.contains(&vid))
    {
        features.insert(Capability::NativeUsb);
    }

    // Native USB boards expose CIRCUITPY and reload on write
    if features.contains(&Capability::NativeUsb) {
        features.insert(Capability::FileSystem);
        features.insert(Capability::HotReload);
    }

    caps.protocols = vec![DeviceProtocol::Serial];
    if features.contains(&Capability::NativeUsb) || device.protocol == DeviceProtocol::Usb {
        caps.protocols.push(DeviceProtocol::Usb);
    }

    caps.features.extend(features);
    caps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serial(name: &str) -> Device {
        Device::new(name.to_lowercase().replace(' ', "-"), name, DeviceProtocol::Serial)
    }

    #[test]
    fn test_esp32_has_wireless() {
        let caps = classify_device(&serial("HUZZAH32 ESP32 Feather"));
        assert_eq!(caps.board_family.as_deref(), Some("esp32"));
        assert!(caps.has(Capability::Wifi));
        assert!(caps.has(Capability::Bluetooth));
        assert!(!caps.has(Capability::NativeUsb));
        assert_eq!(caps.protocols, vec![DeviceProtocol::Serial]);
    }

    #[test]
    fn test_specific_rule_wins() {
        let caps = classify_device(&serial("Adafruit MagTag ESP32-S2"));
        assert_eq!(caps.board_family.as_deref(), Some("esp32s2"));
        assert!(caps.has(Capability::Wifi));
        assert!(!caps.has(Capability::Bluetooth));
        assert!(caps.has(Capability::Display));
        assert!(caps.has(Capability::FileSystem));
        assert!(caps.supports_protocol(DeviceProtocol::Usb));
    }

    #[test]
    fn test_vendor_id_implies_native_usb() {
        let device = serial("Unknown Board").with_usb_ids(0x239A, 0x8000);
        let caps = classify_device(&device);
        assert!(caps.board_family.is_none());
        assert!(caps.has(Capability::NativeUsb));
        assert!(caps.has(Capability::HotReload));
    }

    #[test]
    fn test_virtual_device() {
        let caps = classify_device(&Device::virtual_device("sim", "Board"));
        assert_eq!(caps.protocols, vec![DeviceProtocol::Virtual]);
        assert!(caps.has(Capability::Repl));
        assert!(!caps.has(Capability::Wifi));

        let caps = classify_device(&serial("Simulated CLUE"));
        assert_eq!(caps.board_family.as_deref(), Some("virtual"));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let device = serial("Adafruit CLUE nRF52840");
        assert_eq!(
            classify_device(&device).features,
            classify_device(&device).features
        );
    }
}
