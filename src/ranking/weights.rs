//! Historical per-type weights.
//!
//! An external source reports success/failure counts and timing per job type
//! (optionally per type and pipeline). Each entry is turned into a weight
//! around the neutral 1.0: reliable, fast types drift above it, flaky or slow
//! ones below. Sparse history stays close to neutral.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::RankerConfig;
use crate::error::Result;

/// Lookup key for a historical weight.
///
/// The composite key is consulted first, the bare type second.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WeightKey {
    Composite { job_type: String, pipeline: String },
    Type(String),
}

impl WeightKey {
    pub fn composite(job_type: impl Into<String>, pipeline: impl Into<String>) -> Self {
        WeightKey::Composite {
            job_type: job_type.into(),
            pipeline: pipeline.into(),
        }
    }

    pub fn job_type(job_type: impl Into<String>) -> Self {
        WeightKey::Type(job_type.into())
    }
}

/// Raw history for one job type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeStats {
    pub success_count: u64,
    pub fail_count: u64,
    /// Expected execution time (any unit, same as `actual_time_ema`).
    pub expected_time: Option<f64>,
    /// Measured execution time EMA.
    pub actual_time_ema: Option<f64>,
    /// Sample count when it differs from `success_count + fail_count`.
    pub total_samples: Option<u64>,
}

impl TypeStats {
    pub fn new(success_count: u64, fail_count: u64) -> Self {
        Self {
            success_count,
            fail_count,
            ..Default::default()
        }
    }

    pub fn with_timing(mut self, expected_time: f64, actual_time_ema: f64) -> Self {
        self.expected_time = Some(expected_time);
        self.actual_time_ema = Some(actual_time_ema);
        self
    }
}

/// Provider of the per-type history table.
///
/// Called once per ranking pass. A failing call leaves the previous weights
/// in place.
pub trait TypeStatsSource: Send + Sync {
    fn snapshot(&self) -> Result<HashMap<WeightKey, TypeStats>>;
}

impl<F> TypeStatsSource for F
where
    F: Fn() -> Result<HashMap<WeightKey, TypeStats>> + Send + Sync,
{
    fn snapshot(&self) -> Result<HashMap<WeightKey, TypeStats>> {
        self()
    }
}

/// Shared handle to a stats source.
pub type SharedStatsSource = Arc<dyn TypeStatsSource>;

/// Computes the historical weight of a job type.
///
/// `yield = (s + ε) / (s + f + 2ε)` is a Bayesian success estimate; it is
/// multiplied by `expected / max(1, actual)` and blended toward 1.0 with
/// confidence `min(1, n / N_MIN)`. The result is clamped to
/// `[w_min, w_max]`.
pub fn calculate_type_weight(stats: &TypeStats, config: &RankerConfig) -> f64 {
    let success = stats.success_count as f64;
    let fail = stats.fail_count as f64;
    let eps = config.epsilon;

    let expected = stats.expected_time.filter(|t| t.is_finite()).unwrap_or(1.0);
    let actual = match stats.actual_time_ema.filter(|t| t.is_finite()) {
        Some(t) if t != 0.0 => t,
        Some(_) => 1.0,
        None if expected != 0.0 => expected,
        None => 1.0,
    };

    let yield_k = (success + eps) / (success + fail + 2.0 * eps);
    let w_raw = (expected / actual.max(1.0)) * yield_k;

    let samples = stats
        .total_samples
        .unwrap_or(stats.success_count + stats.fail_count) as f64;
    let confidence = (samples / config.n_min).min(1.0);

    let blended = confidence * w_raw + (1.0 - confidence);
    blended.clamp(config.w_min, config.w_max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RankerConfig {
        RankerConfig::default()
    }

    #[test]
    fn test_no_history_is_neutral() {
        let w = calculate_type_weight(&TypeStats::default(), &cfg());
        assert!((w - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_full_confidence_reliable_type() {
        // 100 successes, 0 failures, on-time: yield = 102/104.
        let w = calculate_type_weight(&TypeStats::new(100, 0).with_timing(10.0, 10.0), &cfg());
        assert!((w - 102.0 / 104.0).abs() < 1e-12);
    }

    #[test]
    fn test_fast_type_boosted_and_clamped() {
        let w = calculate_type_weight(&TypeStats::new(200, 0).with_timing(100.0, 10.0), &cfg());
        assert_eq!(w, cfg().w_max);
    }

    #[test]
    fn test_failing_type_penalized_and_clamped() {
        let w = calculate_type_weight(&TypeStats::new(0, 500).with_timing(1.0, 50.0), &cfg());
        assert_eq!(w, cfg().w_min);
    }

    #[test]
    fn test_low_confidence_fades_to_neutral() {
        let sparse = calculate_type_weight(&TypeStats::new(0, 5), &cfg());
        let dense = calculate_type_weight(&TypeStats::new(0, 50), &cfg());
        assert!(sparse > dense);
        assert!(sparse < 1.0);
        // confidence 0.1: 0.1 * (2/9) + 0.9
        assert!((sparse - (0.1 * (2.0 / 9.0) + 0.9)).abs() < 1e-12);
    }

    #[test]
    fn test_closure_source() {
        let source = || -> Result<HashMap<WeightKey, TypeStats>> {
            Ok(HashMap::from([(WeightKey::job_type("img"), TypeStats::new(1, 0))]))
        };
        let snapshot = source.snapshot().unwrap();
        assert!(snapshot.contains_key(&WeightKey::job_type("img")));
    }
}
