//! Score terms
//!
//! Each candidate is scored on five independent terms plus an optional
//! custom term. A candidate failing the required-capability filter has every
//! term zeroed.

use serde::{Deserialize, Serialize};
use tether_types::{Device, DeviceCapabilities, RuntimeInfo, RuntimeType};

use crate::strategy::{ScoringWeights, SelectionPreferences};

/// Flat score for passing the capability filter
pub const BASE_COMPATIBILITY: f64 = 50.0;

/// Points per matched device keyword
pub const KEYWORD_POINTS: f64 = 10.0;

/// Cap on the device-compatibility term
pub const MAX_DEVICE_COMPATIBILITY: f64 = 30.0;

/// Bonus for the flagship runtime
pub const FLAGSHIP_BONUS: f64 = 20.0;

/// Execution speed characteristics
pub fn performance_score(runtime_type: RuntimeType) -> f64 {
    match runtime_type {
        RuntimeType::CircuitPython => 80.0,
        RuntimeType::MicroPython => 90.0,
        RuntimeType::Python => 60.0,
    }
}

/// Memory footprint characteristics (higher is leaner)
pub fn memory_score(runtime_type: RuntimeType) -> f64 {
    match runtime_type {
        RuntimeType::CircuitPython => 70.0,
        RuntimeType::MicroPython => 85.0,
        RuntimeType::Python => 40.0,
    }
}

/// Board keywords each runtime is known to run well on
pub fn compatibility_keywords(runtime_type: RuntimeType) -> &'static [&'static str] {
    match runtime_type {
        RuntimeType::CircuitPython => &[
            "adafruit",
            "feather",
            "circuit playground",
            "clue",
            "pyportal",
            "itsybitsy",
            "qt py",
            "metro",
            "trinket",
            "magtag",
            "rp2040",
            "samd",
        ],
        RuntimeType::MicroPython => &[
            "esp32", "esp8266", "pyboard", "pico", "stm32", "wipy", "m5stack",
        ],
        RuntimeType::Python => &[
            "raspberry", "jetson", "linux", "ft232h", "mcp2221", "beaglebone",
        ],
    }
}

/// Per-term score of one candidate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub base: f64,
    pub device_compatibility: f64,
    pub performance: f64,
    pub memory: f64,
    pub flagship_bonus: f64,
    pub custom: f64,

    /// Weighted sum of all terms
    pub total: f64,
}

impl ScoreBreakdown {
    fn weighted_total(&self, weights: &ScoringWeights) -> f64 {
        self.base * weights.base
            + self.device_compatibility * weights.device_compatibility
            + self.performance * weights.performance
            + self.memory * weights.memory
            + self.flagship_bonus * weights.flagship_bonus
            + self.custom * weights.custom
    }
}

/// Score of one candidate runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeScore {
    pub runtime_type: RuntimeType,
    pub breakdown: ScoreBreakdown,
    pub reasons: Vec<String>,
}

impl RuntimeScore {
    pub fn total(&self) -> f64 {
        self.breakdown.total
    }

    /// Whether the candidate passed the hard filter
    pub fn is_eligible(&self) -> bool {
        self.breakdown.total > 0.0
    }
}

pub(crate) fn device_compatibility(
    runtime_type: RuntimeType,
    device: &Device,
    caps: &DeviceCapabilities,
) -> (f64, Vec<&'static str>) {
    let haystack = format!(
        "{} {} {}",
        device.name.to_lowercase(),
        device.manufacturer.as_deref().unwrap_or("").to_lowercase(),
        caps.board_family.as_deref().unwrap_or("").to_lowercase()
    );

    let matched: Vec<&'static str> = compatibility_keywords(runtime_type)
        .iter()
        .copied()
        .filter(|kw| haystack.contains(kw))
        .collect();
    let score = (matched.len() as f64 * KEYWORD_POINTS).min(MAX_DEVICE_COMPATIBILITY);
    (score, matched)
}

/// Score the built-in terms; the custom term is filled in by the policy
pub(crate) fn score_candidate(
    info: &RuntimeInfo,
    device: &Device,
    caps: &DeviceCapabilities,
    preferences: &SelectionPreferences,
    custom: Option<f64>,
    weights: &ScoringWeights,
) -> RuntimeScore {
    let runtime_type = info.runtime_type;
    let mut reasons = Vec::new();

    let missing: Vec<String> = preferences
        .required_capabilities
        .iter()
        .filter(|cap| !caps.has(**cap) || info.unsupported.contains(*cap))
        .map(|cap| cap.to_string())
        .collect();

    if !missing.is_empty() {
        reasons.push(format!("missing required capabilities: {}", missing.join(", ")));
        return RuntimeScore {
            runtime_type,
            breakdown: ScoreBreakdown::default(),
            reasons,
        };
    }

    let (device_compat, matched) = device_compatibility(runtime_type, device, caps);
    if !matched.is_empty() {
        reasons.push(format!("device keywords matched: {}", matched.join(", ")));
    }

    let flagship_bonus = if runtime_type.is_flagship() {
        reasons.push("flagship runtime".to_string());
        FLAGSHIP_BONUS
    } else {
        0.0
    };

    let mut breakdown = ScoreBreakdown {
        base: BASE_COMPATIBILITY,
        device_compatibility: device_compat,
        performance: performance_score(runtime_type),
        memory: memory_score(runtime_type),
        flagship_bonus,
        custom: custom.unwrap_or(0.0),
        total: 0.0,
    };
    breakdown.total = breakdown.weighted_total(weights);

    RuntimeScore {
        runtime_type,
        breakdown,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_types::{Capability, DeviceId, DeviceProtocol};

    fn device(name: &str) -> (Device, DeviceCapabilities) {
        let device = Device::new("d1", name, DeviceProtocol::Serial);
        let caps = DeviceCapabilities::new(DeviceId::new("d1"));
        (device, caps)
    }

    #[test]
    fn test_keyword_score_is_capped() {
        let (device, caps) = device("Adafruit Feather RP2040 ItsyBitsy QT Py");
        let (score, matched) = device_compatibility(RuntimeType::CircuitPython, &device, &caps);
        assert!(matched.len() > 3);
        assert_eq!(score, MAX_DEVICE_COMPATIBILITY);
    }

    #[test]
    fn test_flagship_total() {
        let (device, caps) = device("Generic Board");
        let score = score_candidate(
            &RuntimeInfo::new(RuntimeType::CircuitPython, "9.0"),
            &device,
            &caps,
            &SelectionPreferences::default(),
            None,
            &ScoringWeights::default(),
        );
        assert_eq!(score.breakdown.device_compatibility, 0.0);
        assert_eq!(score.total(), 50.0 + 80.0 + 70.0 + 20.0);
    }

    #[test]
    fn test_missing_capability_zeroes_all_terms() {
        let (device, caps) = device("Adafruit Feather");
        let prefs = SelectionPreferences::default().require(Capability::Wifi);
        let score = score_candidate(
            &RuntimeInfo::new(RuntimeType::CircuitPython, "9.0"),
            &device,
            &caps,
            &prefs,
            Some(15.0),
            &ScoringWeights::default(),
        );
        assert_eq!(score.breakdown, ScoreBreakdown::default());
        assert!(!score.is_eligible());
    }

    #[test]
    fn test_runtime_unsupported_capability_filters() {
        let (device, mut caps) = device("ESP32 DevKit");
        caps.features.insert(Capability::Bluetooth);
        let prefs = SelectionPreferences::default().require(Capability::Bluetooth);

        let supported = score_candidate(
            &RuntimeInfo::new(RuntimeType::MicroPython, "1.22"),
            &device,
            &caps,
            &prefs,
            None,
            &ScoringWeights::default(),
        );
        let unsupported = score_candidate(
            &RuntimeInfo::new(RuntimeType::CircuitPython, "9.0").without(Capability::Bluetooth),
            &device,
            &caps,
            &prefs,
            None,
            &ScoringWeights::default(),
        );
        assert!(supported.is_eligible());
        assert!(!unsupported.is_eligible());
    }

    #[test]
    fn test_weights_apply() {
        let (device, caps) = device("Generic Board");
        let weights = ScoringWeights {
            performance: 2.0,
            memory: 0.0,
            ..Default::default()
        };
        let score = score_candidate(
            &RuntimeInfo::new(RuntimeType::Python, "3.12"),
            &device,
            &caps,
            &SelectionPreferences::default(),
            None,
            &weights,
        );
        assert_eq!(score.total(), 50.0 + 120.0);
    }
}
