//! Strategies, weights and caller preferences

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tether_types::{Capability, RuntimeType};

/// How scored candidates are ordered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Highest weighted total
    #[default]
    Auto,
    /// Highest performance term
    Performance,
    /// Highest device-compatibility term
    Compatibility,
    /// Highest memory term
    Memory,
    /// The caller's preferred runtime, otherwise `Auto`
    UserPreferred,
    /// The flagship runtime, otherwise `Auto`
    Flagship,
    /// Highest custom-scorer term, or `Auto` without a scorer
    Custom,
}

impl SelectionStrategy {
    pub const ALL: [SelectionStrategy; 7] = [
        SelectionStrategy::Auto,
        SelectionStrategy::Performance,
        SelectionStrategy::Compatibility,
        SelectionStrategy::Memory,
        SelectionStrategy::UserPreferred,
        SelectionStrategy::Flagship,
        SelectionStrategy::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SelectionStrategy::Auto => "auto",
            SelectionStrategy::Performance => "performance",
            SelectionStrategy::Compatibility => "compatibility",
            SelectionStrategy::Memory => "memory",
            SelectionStrategy::UserPreferred => "user_preferred",
            SelectionStrategy::Flagship => "flagship",
            SelectionStrategy::Custom => "custom",
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SelectionStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown selection strategy: {}", s))
    }
}

/// Multipliers applied to each score term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub base: f64,
    pub device_compatibility: f64,
    pub performance: f64,
    pub memory: f64,
    pub flagship_bonus: f64,
    pub custom: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            base: 1.0,
            device_compatibility: 1.0,
            performance: 1.0,
            memory: 1.0,
            flagship_bonus: 1.0,
            custom: 1.0,
        }
    }
}

/// Policy configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub strategy: SelectionStrategy,
    pub fallback_strategy: SelectionStrategy,
    pub weights: ScoringWeights,
}

/// Per-call caller preferences
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionPreferences {
    /// Runtime picked by `UserPreferred`
    pub preferred_runtime: Option<RuntimeType>,

    /// Hard filter: a candidate lacking any of these scores zero
    pub required_capabilities: BTreeSet<Capability>,

    /// Override the configured primary strategy
    pub strategy: Option<SelectionStrategy>,

    /// Override the configured fallback strategy
    pub fallback_strategy: Option<SelectionStrategy>,
}

impl SelectionPreferences {
    pub fn prefer(runtime_type: RuntimeType) -> Self {
        Self {
            preferred_runtime: Some(runtime_type),
            strategy: Some(SelectionStrategy::UserPreferred),
            ..Default::default()
        }
    }

    pub fn require(mut self, capability: Capability) -> Self {
        self.required_capabilities.insert(capability);
        self
    }

    pub fn with_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "user_preferred".parse::<SelectionStrategy>(),
            Ok(SelectionStrategy::UserPreferred)
        );
        assert_eq!("AUTO".parse::<SelectionStrategy>(), Ok(SelectionStrategy::Auto));
        assert!("fastest".parse::<SelectionStrategy>().is_err());
    }
}
