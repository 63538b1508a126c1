//! Selection policy

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tether_types::{Device, DeviceCapabilities, RuntimeInfo, RuntimeType};
use tracing::debug;

use crate::error::{Result, SelectionError};
use crate::score::{score_candidate, RuntimeScore, ScoreBreakdown};
use crate::strategy::{SelectionConfig, SelectionPreferences, SelectionStrategy};

/// A runtime available for selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeCandidate {
    pub runtime_type: RuntimeType,
    pub info: RuntimeInfo,
}

impl RuntimeCandidate {
    pub fn new(info: RuntimeInfo) -> Self {
        Self {
            runtime_type: info.runtime_type,
            info,
        }
    }
}

/// Caller-supplied scoring term
///
/// Implementations must be deterministic for selection to stay deterministic.
pub trait CustomScorer: Send + Sync {
    fn score(
        &self,
        candidate: &RuntimeCandidate,
        device: &Device,
        capabilities: &DeviceCapabilities,
    ) -> f64;
}

/// Which step of the fallback chain produced the result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    Primary,
    Fallback,
    Flagship,
}

/// Outcome of a selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub runtime_type: RuntimeType,
    pub score: RuntimeScore,
    pub strategy: SelectionStrategy,
    pub source: SelectionSource,

    /// All candidates, ordered by the strategy that produced the result
    pub ranking: Vec<RuntimeScore>,
}

impl SelectionResult {
    /// Terminal fallback to the flagship runtime with a synthetic minimal score
    pub fn flagship_fallback(strategy: SelectionStrategy, ranking: Vec<RuntimeScore>) -> Self {
        Self {
            runtime_type: RuntimeType::FLAGSHIP,
            score: RuntimeScore {
                runtime_type: RuntimeType::FLAGSHIP,
                breakdown: ScoreBreakdown {
                    base: 1.0,
                    total: 1.0,
                    ..Default::default()
                },
                reasons: vec!["no candidate met requirements, using flagship runtime".to_string()],
            },
            strategy,
            source: SelectionSource::Flagship,
            ranking,
        }
    }
}

/// Deterministic runtime selection policy
#[derive(Clone, Default)]
pub struct SelectionPolicy {
    config: SelectionConfig,
    custom_scorer: Option<Arc<dyn CustomScorer>>,
}

impl SelectionPolicy {
    pub fn new(config: SelectionConfig) -> Self {
        Self {
            config,
            custom_scorer: None,
        }
    }

    pub fn with_custom_scorer(mut self, scorer: Arc<dyn CustomScorer>) -> Self {
        self.custom_scorer = Some(scorer);
        self
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    /// Score every candidate, ordered by runtime type
    ///
    /// Duplicate runtime types keep the first candidate.
    pub fn score_candidates(
        &self,
        candidates: &[RuntimeCandidate],
        device: &Device,
        capabilities: &DeviceCapabilities,
        preferences: &SelectionPreferences,
    ) -> Vec<RuntimeScore> {
        let mut unique: BTreeMap<RuntimeType, &RuntimeCandidate> = BTreeMap::new();
        for candidate in candidates {
            unique.entry(candidate.runtime_type).or_insert(candidate);
        }

        unique
            .values()
            .map(|candidate| {
                let custom = self
                    .custom_scorer
                    .as_ref()
                    .map(|scorer| scorer.score(candidate, device, capabilities));
                score_candidate(
                    &candidate.info,
                    device,
                    capabilities,
                    preferences,
                    custom,
                    &self.config.weights,
                )
            })
            .collect()
    }

    /// Order scores by `strategy`
    pub fn rank(
        &self,
        strategy: SelectionStrategy,
        scores: &[RuntimeScore],
        preferences: &SelectionPreferences,
    ) -> Vec<RuntimeScore> {
        let mut ranked = scores.to_vec();

        let pinned = match strategy {
            SelectionStrategy::UserPreferred => preferences.preferred_runtime,
            SelectionStrategy::Flagship => Some(RuntimeType::FLAGSHIP),
            _ => None,
        };
        let key: fn(&ScoreBreakdown) -> f64 = match strategy {
            SelectionStrategy::Performance => |b| b.performance,
            SelectionStrategy::Compatibility => |b| b.device_compatibility,
            SelectionStrategy::Memory => |b| b.memory,
            SelectionStrategy::Custom if self.custom_scorer.is_some() => |b| b.custom,
            _ => |b| b.total,
        };

        ranked.sort_by(|a, b| {
            let pinned_a = Some(a.runtime_type) == pinned;
            let pinned_b = Some(b.runtime_type) == pinned;
            pinned_b
                .cmp(&pinned_a)
                .then_with(|| desc(key(&a.breakdown), key(&b.breakdown)))
                .then_with(|| desc(a.total(), b.total()))
                .then_with(|| a.runtime_type.cmp(&b.runtime_type))
        });
        ranked
    }

    /// Select the best runtime
    ///
    /// Tries the primary strategy, then the fallback strategy, then the
    /// flagship runtime with a synthetic minimal score.
    pub fn select_best_runtime(
        &self,
        candidates: &[RuntimeCandidate],
        device: &Device,
        capabilities: &DeviceCapabilities,
        preferences: &SelectionPreferences,
    ) -> Result<SelectionResult> {
        let scores = self.score_candidates(candidates, device, capabilities, preferences);

        let primary = preferences.strategy.unwrap_or(self.config.strategy);
        let fallback = preferences
            .fallback_strategy
            .unwrap_or(self.config.fallback_strategy);

        for (strategy, source) in [
            (primary, SelectionSource::Primary),
            (fallback, SelectionSource::Fallback),
        ] {
            let ranking = self.rank(strategy, &scores, preferences);
            if let Some(best) = ranking.first().filter(|s| s.is_eligible()).cloned() {
                debug!(
                    device_id = %device.id,
                    runtime = %best.runtime_type,
                    strategy = %strategy,
                    total = best.total(),
                    "Runtime selected"
                );
                return Ok(SelectionResult {
                    runtime_type: best.runtime_type,
                    score: best,
                    strategy,
                    source,
                    ranking,
                });
            }
        }

        if scores.iter().any(|s| s.runtime_type.is_flagship()) {
            debug!(device_id = %device.id, "No eligible runtime, falling back to flagship");
            let ranking = self.rank(SelectionStrategy::Flagship, &scores, preferences);
            return Ok(SelectionResult::flagship_fallback(fallback, ranking));
        }

        Err(SelectionError::NoSuitableRuntime(device.id.clone()))
    }
}

fn desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tether_types::{Capability, DeviceId, DeviceProtocol};

    fn all_candidates() -> Vec<RuntimeCandidate> {
        vec![
            RuntimeCandidate::new(RuntimeInfo::new(RuntimeType::CircuitPython, "9.0")),
            RuntimeCandidate::new(RuntimeInfo::new(RuntimeType::MicroPython, "1.22")),
            RuntimeCandidate::new(RuntimeInfo::new(RuntimeType::Python, "3.12")),
        ]
    }

    fn board(name: &str) -> (Device, DeviceCapabilities) {
        let device = Device::new("d1", name, DeviceProtocol::Serial);
        let caps = DeviceCapabilities::new(DeviceId::new("d1"));
        (device, caps)
    }

    struct PreferPython;

    impl CustomScorer for PreferPython {
        fn score(&self, candidate: &RuntimeCandidate, _: &Device, _: &DeviceCapabilities) -> f64 {
            if candidate.runtime_type == RuntimeType::Python {
                500.0
            } else {
                0.0
            }
        }
    }

    #[test]
    fn test_auto_prefers_flagship_on_adafruit_board() {
        let (device, caps) = board("Adafruit Feather M4");
        let result = SelectionPolicy::default()
            .select_best_runtime(&all_candidates(), &device, &caps, &SelectionPreferences::default())
            .unwrap();

        assert_eq!(result.runtime_type, RuntimeType::CircuitPython);
        assert_eq!(result.source, SelectionSource::Primary);
        assert_eq!(result.ranking.len(), 3);
    }

    #[test]
    fn test_performance_strategy() {
        let (device, caps) = board("Generic Board");
        let prefs = SelectionPreferences::default().with_strategy(SelectionStrategy::Performance);
        let result = SelectionPolicy::default()
            .select_best_runtime(&all_candidates(), &device, &caps, &prefs)
            .unwrap();
        assert_eq!(result.runtime_type, RuntimeType::MicroPython);
    }

    #[test]
    fn test_compatibility_strategy() {
        let (device, caps) = board("Raspberry Pi with FT232H");
        let prefs = SelectionPreferences::default().with_strategy(SelectionStrategy::Compatibility);
        let result = SelectionPolicy::default()
            .select_best_runtime(&all_candidates(), &device, &caps, &prefs)
            .unwrap();
        assert_eq!(result.runtime_type, RuntimeType::Python);
    }

    #[test]
    fn test_user_preferred() {
        let (device, caps) = board("Adafruit Feather");
        let result = SelectionPolicy::default()
            .select_best_runtime(
                &all_candidates(),
                &device,
                &caps,
                &SelectionPreferences::prefer(RuntimeType::Python),
            )
            .unwrap();
        assert_eq!(result.runtime_type, RuntimeType::Python);
        assert_eq!(result.strategy, SelectionStrategy::UserPreferred);
    }

    #[test]
    fn test_user_preferred_unavailable_behaves_like_auto() {
        let (device, caps) = board("Adafruit Feather");
        let candidates = &all_candidates()[..2];
        let result = SelectionPolicy::default()
            .select_best_runtime(
                candidates,
                &device,
                &caps,
                &SelectionPreferences::prefer(RuntimeType::Python),
            )
            .unwrap();
        assert_eq!(result.runtime_type, RuntimeType::CircuitPython);
    }

    #[test]
    fn test_custom_scorer() {
        let (device, caps) = board("Adafruit Feather");
        let policy = SelectionPolicy::default().with_custom_scorer(Arc::new(PreferPython));
        let prefs = SelectionPreferences::default().with_strategy(SelectionStrategy::Custom);
        let result = policy
            .select_best_runtime(&all_candidates(), &device, &caps, &prefs)
            .unwrap();
        assert_eq!(result.runtime_type, RuntimeType::Python);
        assert_eq!(result.score.breakdown.custom, 500.0);
    }

    #[test]
    fn test_custom_without_scorer_is_auto() {
        let (device, caps) = board("Adafruit Feather");
        let prefs = SelectionPreferences::default().with_strategy(SelectionStrategy::Custom);
        let result = SelectionPolicy::default()
            .select_best_runtime(&all_candidates(), &device, &caps, &prefs)
            .unwrap();
        assert_eq!(result.runtime_type, RuntimeType::CircuitPython);
    }

    #[test]
    fn test_filtered_preferred_uses_fallback() {
        let (device, mut caps) = board("ESP32 DevKit");
        caps.features.insert(Capability::Bluetooth);
        let mut candidates = all_candidates();
        candidates[2].info = RuntimeInfo::new(RuntimeType::Python, "3.12").without(Capability::Bluetooth);

        let prefs = SelectionPreferences::prefer(RuntimeType::Python).require(Capability::Bluetooth);
        let result = SelectionPolicy::default()
            .select_best_runtime(&candidates, &device, &caps, &prefs)
            .unwrap();

        assert_eq!(result.source, SelectionSource::Fallback);
        assert_eq!(result.runtime_type, RuntimeType::MicroPython);
    }

    #[test]
    fn test_all_filtered_falls_back_to_flagship() {
        let (device, caps) = board("ESP32 DevKit");
        let prefs = SelectionPreferences::default().require(Capability::Wifi);
        let policy = SelectionPolicy::default();

        let scores = policy.score_candidates(&all_candidates(), &device, &caps, &prefs);
        assert!(scores.iter().all(|s| s.total() == 0.0));

        let result = policy
            .select_best_runtime(&all_candidates(), &device, &caps, &prefs)
            .unwrap();
        assert_eq!(result.runtime_type, RuntimeType::FLAGSHIP);
        assert_eq!(result.source, SelectionSource::Flagship);
        assert_eq!(result.score.total(), 1.0);
    }

    #[test]
    fn test_no_flagship_no_runtime() {
        let (device, caps) = board("ESP32 DevKit");
        let prefs = SelectionPreferences::default().require(Capability::Wifi);
        let err = SelectionPolicy::default()
            .select_best_runtime(&all_candidates()[1..], &device, &caps, &prefs)
            .unwrap_err();
        assert!(matches!(err, SelectionError::NoSuitableRuntime(_)));

        let err = SelectionPolicy::default()
            .select_best_runtime(&[], &device, &caps, &SelectionPreferences::default())
            .unwrap_err();
        assert!(matches!(err, SelectionError::NoSuitableRuntime(_)));
    }

    fn candidate_subset() -> impl Strategy<Value = Vec<RuntimeCandidate>> {
        prop::sample::subsequence(all_candidates(), 0..=3).prop_shuffle()
    }

    fn strategy_strategy() -> impl Strategy<Value = SelectionStrategy> {
        prop::sample::select(SelectionStrategy::ALL.to_vec())
    }

    fn capability_strategy() -> impl Strategy<Value = Capability> {
        prop::sample::select(vec![
            Capability::Wifi,
            Capability::Bluetooth,
            Capability::Display,
            Capability::NativeUsb,
        ])
    }

    fn name_strategy() -> impl Strategy<Value = String> {
        prop::sample::select(vec![
            "Adafruit Feather M4".to_string(),
            "ESP32 DevKit".to_string(),
            "Raspberry Pi Pico".to_string(),
            "Unknown".to_string(),
        ])
    }

    proptest! {
        #[test]
        fn property_selection_is_deterministic(
            candidates in candidate_subset(),
            strategy in strategy_strategy(),
            name in name_strategy(),
            device_caps in prop::collection::btree_set(capability_strategy(), 0..3),
            required in prop::collection::btree_set(capability_strategy(), 0..2),
            preferred in prop::option::of(prop::sample::select(RuntimeType::ALL.to_vec())),
        ) {
            let device = Device::new("d1", name, DeviceProtocol::Serial);
            let mut caps = DeviceCapabilities::new(DeviceId::new("d1"));
            caps.features = device_caps;
            let prefs = SelectionPreferences {
                preferred_runtime: preferred,
                required_capabilities: required,
                strategy: Some(strategy),
                fallback_strategy: None,
            };
            let policy = SelectionPolicy::default();

            let first = policy.select_best_runtime(&candidates, &device, &caps, &prefs);
            let mut reversed = candidates.clone();
            reversed.reverse();
            let second = policy.select_best_runtime(&reversed, &device, &caps, &prefs);

            match (first, second) {
                (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
                (Err(_), Err(_)) => {}
                _ => prop_assert!(false, "selection outcome depended on candidate order"),
            }
        }

        #[test]
        fn property_filtered_candidates_fall_back_to_flagship(
            candidates in candidate_subset(),
        ) {
            let (device, caps) = board("ESP32 DevKit");
            let prefs = SelectionPreferences::default().require(Capability::Wifi);
            let result = SelectionPolicy::default()
                .select_best_runtime(&candidates, &device, &caps, &prefs);

            let has_flagship = candidates.iter().any(|c| c.runtime_type.is_flagship());
            match result {
                Ok(selection) => {
                    prop_assert!(has_flagship);
                    prop_assert_eq!(selection.runtime_type, RuntimeType::FLAGSHIP);
                }
                Err(_) => prop_assert!(!has_flagship),
            }
        }
    }
}
