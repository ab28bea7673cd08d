//! Per-(bucket, pipeline, node) learning state.

use serde::{Deserialize, Serialize};

use super::AffinityConfig;

/// Flat key of one affinity record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AffinityKey {
    pub bucket: String,
    pub pipeline: String,
    pub node_id: String,
}

impl AffinityKey {
    pub fn new(
        bucket: impl Into<String>,
        pipeline: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            pipeline: pipeline.into(),
            node_id: node_id.into(),
        }
    }
}

/// Learned behaviour of one node on one pipeline within one size bucket.
///
/// Fast timescale: `ema_time` (seconds per byte) and its mean absolute
/// deviation, smoothed by `ema_alpha`. Medium timescale: `smooth_success`
/// and `smooth_total`, smoothed by `adaptation_rate`. Lifetime counters are
/// never decayed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AffinityRecord {
    pub total_success: u64,
    pub total_attempts: u64,
    /// Last observation (epoch ms).
    pub last_update_ms: i64,
    pub ema_time: f64,
    pub deviation: f64,
    pub smooth_success: f64,
    pub smooth_total: f64,
}

impl AffinityRecord {
    /// Folds one outcome into the record.
    pub(crate) fn update(
        &mut self,
        config: &AffinityConfig,
        execution_rate: f64,
        success: bool,
        timestamp_ms: i64,
    ) {
        let alpha = config.ema_alpha;
        self.ema_time = alpha * execution_rate + (1.0 - alpha) * self.ema_time;
        let deviation_input = (execution_rate - self.ema_time).abs();
        self.deviation = alpha * deviation_input + (1.0 - alpha) * self.deviation;

        let rho = config.adaptation_rate;
        let indicator = if success { 1.0 } else { 0.0 };
        self.smooth_success = rho * indicator + (1.0 - rho) * self.smooth_success;
        self.smooth_total = rho + (1.0 - rho) * self.smooth_total;

        if success {
            self.total_success += 1;
        }
        self.total_attempts += 1;
        self.last_update_ms = timestamp_ms;
    }

    /// `1 / (ema_time + λ·deviation + ε)`.
    pub fn performance(&self, config: &AffinityConfig) -> f64 {
        1.0 / (self.ema_time + config.variance_penalty * self.deviation + config.performance_epsilon)
    }

    /// Beta-prior smoothed success rate.
    pub fn reliability(&self, config: &AffinityConfig) -> f64 {
        (self.smooth_success + config.prior_alpha)
            / (self.smooth_total + config.prior_alpha + config.prior_beta)
    }

    /// Sample-count confidence decayed by the time since the last update.
    pub fn confidence(&self, config: &AffinityConfig, now_ms: i64) -> f64 {
        let n = self.total_attempts as f64;
        let structural = n / (n + config.min_samples);
        let delta_sec = (now_ms - self.last_update_ms).max(0) as f64 / 1000.0;
        structural * (-delta_sec / config.decay_tau_sec).exp()
    }

    /// Performance × Reliability × Confidence.
    pub fn score(&self, config: &AffinityConfig, now_ms: i64) -> f64 {
        self.performance(config) * self.reliability(config) * self.confidence(config, now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_update_from_zero() {
        let cfg = AffinityConfig::default();
        let mut rec = AffinityRecord::default();
        rec.update(&cfg, 10.0, true, 1_000);

        // EMAs start at zero, not at the first sample.
        assert!((rec.ema_time - 2.0).abs() < 1e-12);
        assert!((rec.deviation - 0.2 * 8.0).abs() < 1e-12);
        assert!((rec.smooth_success - 0.02).abs() < 1e-12);
        assert!((rec.smooth_total - 0.02).abs() < 1e-12);
        assert_eq!((rec.total_success, rec.total_attempts), (1, 1));
        assert_eq!(rec.last_update_ms, 1_000);
    }

    #[test]
    fn test_failure_counts_attempt_only() {
        let cfg = AffinityConfig::default();
        let mut rec = AffinityRecord::default();
        rec.update(&cfg, 1.0, false, 0);
        assert_eq!((rec.total_success, rec.total_attempts), (0, 1));
        assert_eq!(rec.smooth_success, 0.0);
    }

    #[test]
    fn test_confidence_decays_with_time() {
        let cfg = AffinityConfig::default();
        let mut rec = AffinityRecord::default();
        rec.update(&cfg, 1.0, true, 0);
        let fresh = rec.confidence(&cfg, 0);
        let day_old = rec.confidence(&cfg, 86_400_000);
        assert!((fresh - 1.0 / 51.0).abs() < 1e-12);
        assert!((day_old - fresh * (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_reliability_prior() {
        let cfg = AffinityConfig::default();
        let rec = AffinityRecord::default();
        assert!((rec.reliability(&cfg) - 0.5).abs() < 1e-12);
    }
}
