//! Node-pipeline affinity learning.
//!
//! Learns how well each node handles each pipeline, separately per file-size
//! bucket, from completed job outcomes. The dispatcher multiplies node
//! desirability by this affinity to form a bid.
//!
//! # Algorithm
//!
//! ```text
//! affinity = Performance × Reliability × Confidence
//! Performance = 1 / (ema_time + λ·deviation + ε)
//! Reliability = (smooth_success + α₀) / (smooth_total + α₀ + β₀)
//! Confidence  = n / (n + min_samples) · exp(-Δt / τ)
//! ```
//!
//! Records are created on first observation and never deleted. There is no
//! separate reliability decay, so a node recovering from a bad streak earns
//! back affinity slowly.

mod record;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

pub use record::{AffinityKey, AffinityRecord};

const MB: u64 = 1024 * 1024;

/// Inclusive file-size range with a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeBucket {
    pub name: String,
    /// Smallest size (bytes, inclusive).
    pub min: u64,
    /// Largest size (bytes, inclusive).
    pub max: u64,
}

impl SizeBucket {
    pub fn new(name: impl Into<String>, min: u64, max: u64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    pub fn contains(&self, size_bytes: u64) -> bool {
        size_bytes >= self.min && size_bytes <= self.max
    }
}

/// Affinity configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffinityConfig {
    /// Size buckets. When ranges overlap the last match wins.
    pub buckets: Vec<SizeBucket>,
    /// λ: weight of the execution-time deviation in performance.
    pub variance_penalty: f64,
    /// α: fast EMA factor for execution time and deviation.
    pub ema_alpha: f64,
    /// Attempts at which structural confidence reaches 0.5.
    pub min_samples: f64,
    /// τ: confidence decay time constant (seconds).
    pub decay_tau_sec: f64,
    /// α₀: Beta prior successes.
    pub prior_alpha: f64,
    /// β₀: Beta prior failures.
    pub prior_beta: f64,
    /// ρ: medium EMA factor for the reliability counters.
    pub adaptation_rate: f64,
    /// Score of a node without a record.
    pub fallback_score: f64,
    /// ε in the performance denominator.
    pub performance_epsilon: f64,
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self {
            buckets: vec![
                SizeBucket::new("small", 0, 10 * MB),
                SizeBucket::new("medium", 10 * MB + 1, 100 * MB),
                SizeBucket::new("large", 100 * MB + 1, 1024 * MB),
                SizeBucket::new("huge", 1024 * MB + 1, u64::MAX),
            ],
            variance_penalty: 0.75,
            ema_alpha: 0.2,
            min_samples: 50.0,
            decay_tau_sec: 86_400.0,
            prior_alpha: 2.0,
            prior_beta: 2.0,
            adaptation_rate: 0.02,
            fallback_score: 0.1,
            performance_epsilon: 1e-9,
        }
    }
}

/// One completed job as seen by the affinity learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffinityObservation {
    pub pipeline: String,
    pub size_bytes: u64,
    pub execution_time_sec: f64,
    pub success: bool,
    pub timestamp_ms: i64,
}

/// Affinity score of one node for a given (pipeline, size).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAffinity {
    pub node_id: String,
    pub score: f64,
}

/// Learns node-pipeline affinity from outcomes.
#[derive(Debug, Clone, Default)]
pub struct AffinityEngine {
    config: AffinityConfig,
    records: HashMap<AffinityKey, AffinityRecord>,
}

impl AffinityEngine {
    pub fn new(config: AffinityConfig) -> Self {
        Self {
            config,
            records: HashMap::new(),
        }
    }

    pub fn config(&self) -> &AffinityConfig {
        &self.config
    }

    /// Name of the bucket holding `size_bytes`.
    pub fn bucket_for(&self, size_bytes: u64) -> Option<&str> {
        self.config
            .buckets
            .iter()
            .rev()
            .find(|b| b.contains(size_bytes))
            .map(|b| b.name.as_str())
    }

    /// Folds one outcome into the node's record.
    ///
    /// Returns false when no bucket covers the size.
    pub fn observe(&mut self, node_id: &str, obs: &AffinityObservation) -> bool {
        let Some(bucket) = self.bucket_for(obs.size_bytes).map(str::to_string) else {
            debug!(
                node_id,
                size_bytes = obs.size_bytes,
                "AffinityEngine::observe: no bucket for size"
            );
            return false;
        };
        let execution_rate = if obs.execution_time_sec.is_finite() {
            obs.execution_time_sec.max(0.0) / obs.size_bytes.max(1) as f64
        } else {
            0.0
        };
        let key = AffinityKey::new(bucket, obs.pipeline.clone(), node_id);
        self.records.entry(key).or_default().update(
            &self.config,
            execution_rate,
            obs.success,
            obs.timestamp_ms,
        );
        trace!(node_id, pipeline = %obs.pipeline, "AffinityEngine::observe: updated");
        true
    }

    /// Affinity of one node, or the fallback without a record.
    pub fn score(&self, pipeline: &str, size_bytes: u64, node_id: &str, now_ms: i64) -> f64 {
        self.bucket_for(size_bytes)
            .and_then(|bucket| self.records.get(&AffinityKey::new(bucket, pipeline, node_id)))
            .map(|record| record.score(&self.config, now_ms))
            .filter(|score| score.is_finite())
            .unwrap_or(self.config.fallback_score)
    }

    /// Affinity of every listed node, sorted descending.
    pub fn get_affinity<'a>(
        &self,
        pipeline: &str,
        size_bytes: u64,
        node_ids: impl IntoIterator<Item = &'a str>,
        now_ms: i64,
    ) -> Vec<NodeAffinity> {
        let mut result: Vec<NodeAffinity> = node_ids
            .into_iter()
            .map(|node_id| NodeAffinity {
                node_id: node_id.to_string(),
                score: self.score(pipeline, size_bytes, node_id, now_ms),
            })
            .collect();
        result.sort_by(|a, b| b.score.total_cmp(&a.score));
        result
    }

    /// The record for an exact key.
    pub fn record(&self, key: &AffinityKey) -> Option<&AffinityRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(pipeline: &str, size: u64, secs: f64, success: bool) -> AffinityObservation {
        AffinityObservation {
            pipeline: pipeline.into(),
            size_bytes: size,
            execution_time_sec: secs,
            success,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_fallback_without_record() {
        let engine = AffinityEngine::default();
        let result = engine.get_affinity("ocr", 1_000, ["n1", "n2"], 0);
        assert_eq!(result.len(), 2);
        assert!(result.iter().all(|a| a.score == 0.1));
    }

    #[test]
    fn test_fallback_for_unknown_node_only() {
        let mut engine = AffinityEngine::default();
        for _ in 0..100 {
            engine.observe("fast", &obs("ocr", 1_000, 0.001, true));
        }
        let result = engine.get_affinity("ocr", 2_000, ["new", "fast"], 0);
        assert_eq!(result[0].node_id, "fast");
        assert!(result[0].score > 0.1);
        assert_eq!(result[1], NodeAffinity { node_id: "new".into(), score: 0.1 });
    }

    #[test]
    fn test_buckets_are_separate() {
        let mut engine = AffinityEngine::default();
        engine.observe("n1", &obs("ocr", 1_000, 1.0, true));
        assert_eq!(engine.score("ocr", 50 * MB, "n1", 0), 0.1);
        assert_ne!(engine.score("ocr", 2_000, "n1", 0), 0.1);
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_no_bucket_rejects_observation() {
        let mut engine = AffinityEngine::new(AffinityConfig {
            buckets: vec![SizeBucket::new("tiny", 0, 10)],
            ..Default::default()
        });
        assert!(!engine.observe("n1", &obs("ocr", 11, 1.0, true)));
        assert!(engine.is_empty());
        assert_eq!(engine.score("ocr", 11, "n1", 0), 0.1);
    }

    #[test]
    fn test_last_matching_bucket_wins() {
        let engine = AffinityEngine::new(AffinityConfig {
            buckets: vec![SizeBucket::new("a", 0, 100), SizeBucket::new("b", 50, 200)],
            ..Default::default()
        });
        assert_eq!(engine.bucket_for(75), Some("b"));
        assert_eq!(engine.bucket_for(10), Some("a"));
    }

    #[test]
    fn test_reliability_increases_with_success_rate() {
        let cfg = AffinityConfig::default();
        let mut previous = f64::NEG_INFINITY;
        for successes in 0..=10 {
            let mut engine = AffinityEngine::new(cfg.clone());
            for i in 0..10 {
                engine.observe("n1", &obs("ocr", 1_000, 1.0, i < successes));
            }
            let key = AffinityKey::new("small", "ocr", "n1");
            let reliability = engine.record(&key).unwrap().reliability(&cfg);
            assert!(reliability > previous);
            previous = reliability;
        }
    }

    #[test]
    fn test_faster_node_scores_higher() {
        let mut engine = AffinityEngine::default();
        for _ in 0..20 {
            engine.observe("fast", &obs("ocr", 1_000, 0.5, true));
            engine.observe("slow", &obs("ocr", 1_000, 5.0, true));
        }
        let result = engine.get_affinity("ocr", 1_000, ["slow", "fast"], 0);
        assert_eq!(result[0].node_id, "fast");
        assert!(result[0].score > result[1].score);
    }

    #[test]
    fn test_zero_size_guarded() {
        let mut engine = AffinityEngine::default();
        assert!(engine.observe("n1", &obs("ocr", 0, 2.0, true)));
        assert!(engine.score("ocr", 0, "n1", 0).is_finite());
    }
}
