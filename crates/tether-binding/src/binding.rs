//! Binding records

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_types::{DeviceId, Runtime, RuntimeType};

/// Switches remembered per binding; older entries are dropped
pub const MAX_PREVIOUS_RUNTIMES: usize = 8;

/// Caller preferences carried by a binding across switches
pub type BindingPreferences = BTreeMap<String, serde_json::Value>;

/// A runtime a device was bound to before a switch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviousBinding {
    pub runtime_type: RuntimeType,
    pub bound_at: DateTime<Utc>,
    pub replaced_at: DateTime<Utc>,
}

/// Persistable part of a binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingRecord {
    pub device_id: DeviceId,
    pub runtime_type: RuntimeType,
    pub bound_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub preferences: BindingPreferences,

    /// Earlier runtimes, oldest first, at most [`MAX_PREVIOUS_RUNTIMES`]
    pub previous_runtimes: Vec<PreviousBinding>,
}

impl BindingRecord {
    pub fn new(device_id: DeviceId, runtime_type: RuntimeType, preferences: BindingPreferences) -> Self {
        let now = Utc::now();
        Self {
            device_id,
            runtime_type,
            bound_at: now,
            last_activity: now,
            preferences,
            previous_runtimes: Vec::new(),
        }
    }

    /// The runtime bound immediately before the current one
    pub fn previous_runtime(&self) -> Option<RuntimeType> {
        self.previous_runtimes.last().map(|p| p.runtime_type)
    }

    /// Replace the runtime type, moving the current one onto the trail
    pub(crate) fn switched_to(&self, runtime_type: RuntimeType) -> Self {
        let now = Utc::now();
        let mut previous_runtimes = self.previous_runtimes.clone();
        previous_runtimes.push(PreviousBinding {
            runtime_type: self.runtime_type,
            bound_at: self.bound_at,
            replaced_at: now,
        });
        if previous_runtimes.len() > MAX_PREVIOUS_RUNTIMES {
            let excess = previous_runtimes.len() - MAX_PREVIOUS_RUNTIMES;
            previous_runtimes.drain(..excess);
        }

        Self {
            device_id: self.device_id.clone(),
            runtime_type,
            bound_at: now,
            last_activity: now,
            preferences: self.preferences.clone(),
            previous_runtimes,
        }
    }
}

/// A live binding: the record plus the runtime instance
#[derive(Clone)]
pub struct RuntimeBinding {
    pub record: BindingRecord,
    pub runtime: Arc<dyn Runtime>,
}

impl std::fmt::Debug for RuntimeBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBinding")
            .field("record", &self.record)
            .field("runtime", &self.runtime.runtime_type())
            .finish()
    }
}
