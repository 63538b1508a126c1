//! Hardware resource types shared between the registry and the event stream

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction/function a pin is configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinMode {
    Input,
    InputPullUp,
    InputPullDown,
    Output,
    Analog,
    Pwm,
}

/// Value carried by a pin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PinValue {
    Digital(bool),
    Analog(f64),
    /// PWM duty cycle in 0.0..=1.0
    Duty(f64),
}

/// Key of a claimable hardware resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKey {
    Pin(u8),
    Sensor(String),
    Component(String),
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Pin(pin) => write!(f, "pin_{}", pin),
            ResourceKey::Sensor(id) => write!(f, "sensor_{}", id),
            ResourceKey::Component(id) => write!(f, "component_{}", id),
        }
    }
}

/// How contested resource claims are resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// The current owner keeps the resource
    FirstWins,
    /// Ownership moves to the claimant
    LastWins,
    /// Ownership moves only if the claimant has strictly higher priority
    #[default]
    PriorityBased,
    /// Deferred to the UI; resolved as `PriorityBased` here
    UserPrompt,
    /// Contested claims fail hard
    Error,
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictResolution::FirstWins => "first_wins",
            ConflictResolution::LastWins => "last_wins",
            ConflictResolution::PriorityBased => "priority_based",
            ConflictResolution::UserPrompt => "user_prompt",
            ConflictResolution::Error => "error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_key_display() {
        assert_eq!(ResourceKey::Pin(5).to_string(), "pin_5");
        assert_eq!(ResourceKey::Sensor("temp".into()).to_string(), "sensor_temp");
        assert_eq!(
            ResourceKey::Component("neopixel".into()).to_string(),
            "component_neopixel"
        );
    }
}
