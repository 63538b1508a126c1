//! Hardware abstraction registry
//!
//! All state lives behind a single lock so a claim and the write it guards
//! are one atomic step. Events are collected while the lock is held and
//! emitted after it is released.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::Utc;
use parking_lot::RwLock;
use tether_types::{
    AbstractionId, ConflictResolution, DeviceId, EventBus, EventSource, PinMode, PinValue,
    ResourceKey, RuntimeType, TetherEvent,
};
use tracing::{debug, info, instrument, warn};

use crate::config::HardwareConfig;
use crate::error::{HardwareError, Result};
use crate::state::{
    AbstractionSummary, ClaimOutcome, ComponentState, HardwareAbstraction, HardwareStateSummary,
    HistoryEntry, PinState, SensorState, StateChange,
};

struct RegistryState {
    config: HardwareConfig,
    abstractions: HashMap<AbstractionId, HardwareAbstraction>,
    pins: BTreeMap<u8, PinState>,
    sensors: BTreeMap<String, SensorState>,
    components: BTreeMap<String, ComponentState>,
    ownership: HashMap<ResourceKey, AbstractionId>,
    history: VecDeque<HistoryEntry>,
}

impl RegistryState {
    fn priority_of(&self, id: &AbstractionId) -> u32 {
        self.abstractions.get(id).map(|a| a.priority).unwrap_or(0)
    }

    /// Claim `key` for `claimant`
    fn claim(
        &mut self,
        claimant: &AbstractionId,
        key: &ResourceKey,
        events: &mut Vec<TetherEvent>,
    ) -> Result<ClaimOutcome> {
        let owner = match self.ownership.get(key).cloned() {
            None => {
                self.ownership.insert(key.clone(), claimant.clone());
                return Ok(ClaimOutcome::Granted);
            }
            Some(owner) if &owner == claimant => return Ok(ClaimOutcome::AlreadyOwned),
            Some(owner) => owner,
        };

        let strategy = self.config.conflict_resolution;
        let transfer = match strategy {
            ConflictResolution::FirstWins | ConflictResolution::Error => false,
            ConflictResolution::LastWins => true,
            // No prompt round-trip here; the UI decides separately
            ConflictResolution::PriorityBased | ConflictResolution::UserPrompt => {
                self.priority_of(claimant) > self.priority_of(&owner)
            }
        };

        warn!(
            resource = %key,
            owner = %owner,
            claimant = %claimant,
            strategy = %strategy,
            granted = transfer,
            "Hardware resource conflict"
        );
        events.push(TetherEvent::HardwareConflict {
            resource: key.to_string(),
            owner: owner.clone(),
            claimant: claimant.clone(),
            strategy,
            granted: transfer,
        });

        if strategy == ConflictResolution::Error {
            return Err(HardwareError::ResourceConflict {
                resource: key.clone(),
                owner,
                claimant: claimant.clone(),
            });
        }

        if !transfer {
            return Ok(ClaimOutcome::Denied { owner });
        }

        if let Some(previous) = self.abstractions.get_mut(&owner) {
            previous.remove_resource(key);
        }
        self.ownership.insert(key.clone(), claimant.clone());
        Ok(ClaimOutcome::Transferred { from: owner })
    }

    fn remove_global(&mut self, key: &ResourceKey) {
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

    fn record(&mut self, abstraction_id: &AbstractionId, resource: ResourceKey, change: StateChange) {
        if !self.config.enable_history || self.config.max_history_size == 0 {
            return;
        }

        self.history.push_back(HistoryEntry {
            timestamp: Utc::now(),
            abstraction_id: abstraction_id.clone(),
            resource,
            change,
        });
        while self.history.len() > self.config.max_history_size {
            self.history.pop_front();
        }
    }

    fn abstraction_mut(&mut self, id: &AbstractionId) -> Result<&mut HardwareAbstraction> {
        self.abstractions
            .get_mut(id)
            .ok_or_else(|| HardwareError::AbstractionNotFound(id.clone()))
    }

    fn ensure_registered(&self, id: &AbstractionId) -> Result<()> {
        if self.abstractions.contains_key(id) {
            Ok(())
        } else {
            Err(HardwareError::AbstractionNotFound(id.clone()))
        }
    }
}

/// Process-wide hardware abstraction registry
pub struct HardwareRegistry {
    state: RwLock<RegistryState>,
    events: EventBus,
}

impl HardwareRegistry {
    pub fn new(config: HardwareConfig, events: EventBus) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                config,
                abstractions: HashMap::new(),
                pins: BTreeMap::new(),
                sensors: BTreeMap::new(),
                components: BTreeMap::new(),
                ownership: HashMap::new(),
                history: VecDeque::new(),
            }),
            events,
        }
    }

    /// Run a mutation under the write lock, then emit the events it produced
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut RegistryState, &mut Vec<TetherEvent>) -> Result<T>,
    ) -> Result<T> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.state.write();
            f(&mut state, &mut events)
        };

        for event in events {
            self.events.emit(EventSource::Hardware, event);
        }
        result
    }

    /// Register a hardware abstraction with the default priority for its kind
    #[instrument(skip(self))]
    pub fn register_hardware_abstraction(
        &self,
        id: AbstractionId,
        device_id: DeviceId,
        runtime_type: RuntimeType,
        is_virtual: bool,
    ) -> Result<HardwareAbstraction> {
        self.mutate(|state, events| {
            if state.abstractions.contains_key(&id) {
                return Err(HardwareError::AlreadyRegistered(id));
            }

            let priority = if is_virtual {
                state.config.virtual_priority
            } else {
                state.config.physical_priority
            };
            let abstraction =
                HardwareAbstraction::new(id.clone(), device_id.clone(), runtime_type, is_virtual, priority);
            state.abstractions.insert(id.clone(), abstraction.clone());

            info!(abstraction_id = %id, priority, "Hardware abstraction registered");
            events.push(TetherEvent::AbstractionRegistered {
                abstraction_id: id,
                device_id,
                runtime_type,
            });
            Ok(abstraction)
        })
    }

    /// Remove an abstraction, releasing every resource it owns
    ///
    /// Returns the number of released resources.
    #[instrument(skip(self))]
    pub fn unregister_hardware_abstraction(&self, id: &AbstractionId) -> Result<usize> {
        self.mutate(|state, events| {
            state
                .abstractions
                .remove(id)
                .ok_or_else(|| HardwareError::AbstractionNotFound(id.clone()))?;

            let owned: Vec<ResourceKey> = state
                .ownership
                .iter()
                .filter(|(_, owner)| *owner == id)
                .map(|(key, _)| key.clone())
                .collect();

            for key in &owned {
                state.ownership.remove(key);
                state.remove_global(key);
                state.record(id, key.clone(), StateChange::Released);
            }

            info!(abstraction_id = %id, released = owned.len(), "Hardware abstraction unregistered");
            events.push(TetherEvent::AbstractionUnregistered {
                abstraction_id: id.clone(),
                released_resources: owned.len(),
            });
            Ok(owned.len())
        })
    }

    /// Claim a pin and write its state
    pub fn set_pin_state(
        &self,
        abstraction_id: &AbstractionId,
        pin: u8,
        mode: PinMode,
        value: Option<PinValue>,
    ) -> Result<ClaimOutcome> {
        self.mutate(|state, events| {
            state.ensure_registered(abstraction_id)?;
            let key = ResourceKey::Pin(pin);
            let outcome = state.claim(abstraction_id, &key, events)?;
            if !outcome.is_granted() {
                return Ok(outcome);
            }

            let pin_state = PinState {
                pin,
                mode,
                value,
                updated_at: Utc::now(),
            };
            state
                .abstraction_mut(abstraction_id)?
                .pins
                .insert(pin, pin_state.clone());
            state.pins.insert(pin, pin_state.clone());
            state.record(abstraction_id, key, StateChange::Pin(pin_state));

            debug!(abstraction_id = %abstraction_id, pin, ?mode, ?value, "Pin state updated");
            events.push(TetherEvent::PinStateChanged {
                abstraction_id: abstraction_id.clone(),
                pin,
                mode,
                value,
            });
            Ok(outcome)
        })
    }

    /// Claim a sensor and record a reading
    pub fn update_sensor_data(
        &self,
        abstraction_id: &AbstractionId,
        sensor_id: &str,
        value: serde_json::Value,
        unit: Option<String>,
    ) -> Result<ClaimOutcome> {
        self.mutate(|state, events| {
            state.ensure_registered(abstraction_id)?;
            let key = ResourceKey::Sensor(sensor_id.to_string());
            let outcome = state.claim(abstraction_id, &key, events)?;
            if !outcome.is_granted() {
                return Ok(outcome);
            }

            let sensor_state = SensorState {
                sensor_id: sensor_id.to_string(),
                value: value.clone(),
                unit,
                updated_at: Utc::now(),
            };
            state
                .abstraction_mut(abstraction_id)?
                .sensors
                .insert(sensor_id.to_string(), sensor_state.clone());
            state
                .sensors
                .insert(sensor_id.to_string(), sensor_state.clone());
            state.record(abstraction_id, key, StateChange::Sensor(sensor_state));

            events.push(TetherEvent::SensorDataUpdated {
                abstraction_id: abstraction_id.clone(),
                sensor_id: sensor_id.to_string(),
                value,
            });
            Ok(outcome)
        })
    }

    /// Claim a component and replace its state
    pub fn update_component_state(
        &self,
        abstraction_id: &AbstractionId,
        component_id: &str,
        kind: &str,
        component_state: serde_json::Value,
    ) -> Result<ClaimOutcome> {
        self.mutate(|state, events| {
            state.ensure_registered(abstraction_id)?;
            let key = ResourceKey::Component(component_id.to_string());
            let outcome = state.claim(abstraction_id, &key, events)?;
            if !outcome.is_granted() {
                return Ok(outcome);
            }

            let component = ComponentState {
                component_id: component_id.to_string(),
                kind: kind.to_string(),
                state: component_state,
                updated_at: Utc::now(),
            };
            state
                .abstraction_mut(abstraction_id)?
                .components
                .insert(component_id.to_string(), component.clone());
            state
                .components
                .insert(component_id.to_string(), component.clone());
            state.record(abstraction_id, key, StateChange::Component(component));

            events.push(TetherEvent::ComponentUpdated {
                abstraction_id: abstraction_id.clone(),
                component_id: component_id.to_string(),
            });
            Ok(outcome)
        })
    }

    /// Give up a resource. Only the current owner may release it.
    pub fn release_resource(&self, abstraction_id: &AbstractionId, key: &ResourceKey) -> Result<()> {
        self.mutate(|state, _| {
            state.ensure_registered(abstraction_id)?;
            if state.ownership.get(key) != Some(abstraction_id) {
                return Err(HardwareError::NotOwner {
                    resource: key.clone(),
                    abstraction_id: abstraction_id.clone(),
                });
            }

            state.ownership.remove(key);
            state.remove_global(key);
            state.abstraction_mut(abstraction_id)?.remove_resource(key);
            state.record(abstraction_id, key.clone(), StateChange::Released);
            debug!(abstraction_id = %abstraction_id, resource = %key, "Resource released");
            Ok(())
        })
    }

    pub fn set_abstraction_priority(&self, abstraction_id: &AbstractionId, priority: u32) -> Result<()> {
        let mut state = self.state.write();
        state.abstraction_mut(abstraction_id)?.priority = priority;
        Ok(())
    }

    pub fn set_conflict_resolution(&self, strategy: ConflictResolution) {
        info!(strategy = %strategy, "Conflict resolution strategy changed");
        self.state.write().config.conflict_resolution = strategy;
    }

    pub fn conflict_resolution(&self) -> ConflictResolution {
        self.state.read().config.conflict_resolution
    }

    pub fn get_pin_state(&self, pin: u8) -> Option<PinState> {
        self.state.read().pins.get(&pin).cloned()
    }

    pub fn get_sensor_state(&self, sensor_id: &str) -> Option<SensorState> {
        self.state.read().sensors.get(sensor_id).cloned()
    }

    pub fn get_component_state(&self, component_id: &str) -> Option<ComponentState> {
        self.state.read().components.get(component_id).cloned()
    }

    pub fn get_abstraction(&self, abstraction_id: &AbstractionId) -> Option<HardwareAbstraction> {
        self.state.read().abstractions.get(abstraction_id).cloned()
    }

    pub fn list_abstractions(&self) -> Vec<AbstractionId> {
        let mut ids: Vec<AbstractionId> = self.state.read().abstractions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn resource_owner(&self, key: &ResourceKey) -> Option<AbstractionId> {
        self.state.read().ownership.get(key).cloned()
    }

    /// Most recent history entries, oldest first
    pub fn get_history(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        let state = self.state.read();
        let skip = limit
            .map(|limit| state.history.len().saturating_sub(limit))
            .unwrap_or(0);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn clear_history(&self) {
        self.state.write().history.clear();
    }

    pub fn get_hardware_state_summary(&self) -> HardwareStateSummary {
        let state = self.state.read();

        let mut owned_counts: HashMap<&AbstractionId, usize> = HashMap::new();
        for owner in state.ownership.values() {
            *owned_counts.entry(owner).or_default() += 1;
        }

        let mut abstractions: Vec<AbstractionSummary> = state
            .abstractions
            .values()
            .map(|a| AbstractionSummary {
                id: a.id.clone(),
                device_id: a.device_id.clone(),
                runtime_type: a.runtime_type,
                is_virtual: a.is_virtual,
                priority: a.priority,
                owned_resources: owned_counts.get(&a.id).copied().unwrap_or(0),
            })
            .collect();
        abstractions.sort_by(|a, b| a.id.cmp(&b.id));

        HardwareStateSummary {
            conflict_resolution: state.config.conflict_resolution,
            abstractions,
            pins: state.pins.values().cloned().collect(),
            sensors: state.sensors.values().cloned().collect(),
            components: state.components.values().cloned().collect(),
            ownership: state
                .ownership
                .iter()
                .map(|(key, owner)| (key.to_string(), owner.clone()))
                .collect(),
            history_len: state.history.len(),
        }
    }
}
