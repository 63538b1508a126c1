//! Tether Selection - Runtime selection policy
//!
//! A pure function of `(candidates, device, strategy, weights)`: every
//! candidate runtime gets a [`ScoreBreakdown`], the chosen
//! [`SelectionStrategy`] orders the scores, and [`SelectionPolicy::select_best_runtime`]
//! walks the primary strategy, the fallback strategy and finally the
//! flagship runtime.
//!
//! Selection has no side effects. The same inputs always produce the same
//! ranking, independent of candidate order.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod policy;
pub mod score;
pub mod strategy;

// Re-exports
pub use error::{Result, SelectionError};
pub use policy::{
    CustomScorer, RuntimeCandidate, SelectionPolicy, SelectionResult, SelectionSource,
};
pub use score::{RuntimeScore, ScoreBreakdown};
pub use strategy::{ScoringWeights, SelectionConfig, SelectionPreferences, SelectionStrategy};
