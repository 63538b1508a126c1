//! Hardware registry configuration

use serde::{Deserialize, Serialize};
use tether_types::ConflictResolution;

/// Hardware registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Strategy for contested resource claims
    pub conflict_resolution: ConflictResolution,

    /// Record state transitions in the history ring buffer
    pub enable_history: bool,

    /// History capacity; oldest entries are evicted first
    pub max_history_size: usize,

    /// Default priority for virtual abstractions
    pub virtual_priority: u32,

    /// Default priority for physical abstractions
    pub physical_priority: u32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            conflict_resolution: ConflictResolution::PriorityBased,
            enable_history: true,
            max_history_size: 1000,
            virtual_priority: 1,
            physical_priority: 10,
        }
    }
}
