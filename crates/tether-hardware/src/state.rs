//! Hardware state records

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_types::{
    AbstractionId, ConflictResolution, DeviceId, PinMode, PinValue, ResourceKey, RuntimeType,
};

/// State of a single pin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinState {
    pub pin: u8,
    pub mode: PinMode,
    pub value: Option<PinValue>,
    pub updated_at: DateTime<Utc>,
}

/// Latest reading of a sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorState {
    pub sensor_id: String,
    pub value: serde_json::Value,
    pub unit: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// State of a generic component (display, neopixel strip, speaker, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentState {
    pub component_id: String,
    pub kind: String,
    pub state: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Per-binding hardware namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareAbstraction {
    pub id: AbstractionId,
    pub device_id: DeviceId,
    pub runtime_type: RuntimeType,
    pub is_virtual: bool,

    /// Claim priority; higher wins under `priority_based`
    pub priority: u32,

    pub pins: BTreeMap<u8, PinState>,
    pub sensors: BTreeMap<String, SensorState>,
    pub components: BTreeMap<String, ComponentState>,
    pub registered_at: DateTime<Utc>,
}

impl HardwareAbstraction {
    pub(crate) fn new(
        id: AbstractionId,
        device_id: DeviceId,
        runtime_type: RuntimeType,
        is_virtual: bool,
        priority: u32,
    ) -> Self {
        Self {
            id,
            device_id,
            runtime_type,
            is_virtual,
            priority,
            pins: BTreeMap::new(),
            sensors: BTreeMap::new(),
            components: BTreeMap::new(),
            registered_at: Utc::now(),
        }
    }

    pub(crate) fn remove_resource(&mut self, key: &ResourceKey) {
        match key {
            ResourceKey::Pin(pin) => {
                self.pins.remove(pin);
            }
            ResourceKey::Sensor(id) => {
                self.sensors.remove(id);
            }
            ResourceKey::Component(id) => {
                self.components.remove(id);
            }
        }
    }
}

/// Result of a resource claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimOutcome {
    /// The resource was free and is now owned by the claimant
    Granted,
    /// The claimant already owned the resource
    AlreadyOwned,
    /// Ownership moved from another abstraction to the claimant
    Transferred { from: AbstractionId },
    /// The current owner kept the resource; the write was skipped
    Denied { owner: AbstractionId },
}

impl ClaimOutcome {
    pub fn is_granted(&self) -> bool {
        !matches!(self, ClaimOutcome::Denied { .. })
    }
}

/// What a history entry recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateChange {
    Pin(PinState),
    Sensor(SensorState),
    Component(ComponentState),
    Released,
}

/// One recorded state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub abstraction_id: AbstractionId,
    pub resource: ResourceKey,
    pub change: StateChange,
}

/// Compact description of an abstraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbstractionSummary {
    pub id: AbstractionId,
    pub device_id: DeviceId,
    pub runtime_type: RuntimeType,
    pub is_virtual: bool,
    pub priority: u32,
    pub owned_resources: usize,
}

/// Registry-wide snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareStateSummary {
    pub conflict_resolution: ConflictResolution,
    pub abstractions: Vec<AbstractionSummary>,
    pub pins: Vec<PinState>,
    pub sensors: Vec<SensorState>,
    pub components: Vec<ComponentState>,

    /// Resource key (display form) to owner
    pub ownership: BTreeMap<String, AbstractionId>,

    pub history_len: usize,
}
