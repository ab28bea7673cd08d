//! Adaptive job scoring.
//!
//! # Algorithm
//!
//! ```text
//! score = priority * aging * complexity * weight / sqrt(estimated_ram_mb)
//! ```
//!
//! - `aging = min(max_aging, 1 + age / t_aging)`
//! - `complexity = 1 + stages * stage_complexity_modifier`
//! - `weight` comes from the per-type snapshot (composite key, then bare
//!   type, then 1.0)
//! - `estimated_ram_mb` is the peak across stages (or the whole job), where a
//!   streaming stage costs `base_stream_ram_mb` and any other stage costs
//!   `size_mb * expansion`
//!
//! Higher scores dispatch first.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::stage_cost::{StageCostEstimator, StageWeights};
use super::weights::{calculate_type_weight, SharedStatsSource, WeightKey};
use crate::models::{Job, BYTES_PER_MB};

/// Ranker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankerConfig {
    /// Upper bound of the aging multiplier.
    pub max_aging: f64,
    /// Age (ms) that adds 1.0 to the aging multiplier.
    pub t_aging_ms: f64,
    /// Historical weight ceiling.
    pub w_max: f64,
    /// Historical weight floor.
    pub w_min: f64,
    /// Bayesian prior added to success and failure counts.
    pub epsilon: f64,
    /// Samples needed for full confidence in a historical weight.
    pub n_min: f64,
    /// RAM cost of a streaming stage (MB).
    pub base_stream_ram_mb: f64,
    /// RAM cost per input MB of a non-streaming stage.
    pub expansion_multiplier: f64,
    /// Complexity added per stage.
    pub stage_complexity_modifier: f64,
    /// Smallest RAM estimate (MB).
    pub min_ram_mb: f64,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            max_aging: 3.0,
            t_aging_ms: 3_600_000.0,
            w_max: 1.5,
            w_min: 0.1,
            epsilon: 2.0,
            n_min: 50.0,
            base_stream_ram_mb: 250.0,
            expansion_multiplier: 3.0,
            stage_complexity_modifier: 0.05,
            min_ram_mb: 0.1,
        }
    }
}

/// Scores and orders pending jobs.
///
/// Holds the historical weight snapshot between passes and the stage cost
/// estimator that refines per-stage memory estimates.
pub struct JobRanker {
    config: RankerConfig,
    snapshot: HashMap<WeightKey, f64>,
    source: Option<SharedStatsSource>,
    stage_costs: StageCostEstimator,
}

impl JobRanker {
    /// Creates a ranker without a stats source and with an empty estimator.
    pub fn new(config: RankerConfig) -> Self {
        Self {
            config,
            snapshot: HashMap::new(),
            source: None,
            stage_costs: StageCostEstimator::default(),
        }
    }

    /// Sets the per-type stats source.
    pub fn with_stats_source(mut self, source: SharedStatsSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Replaces the stage cost estimator.
    pub fn with_stage_costs(mut self, stage_costs: StageCostEstimator) -> Self {
        self.stage_costs = stage_costs;
        self
    }

    pub fn config(&self) -> &RankerConfig {
        &self.config
    }

    pub fn stage_costs(&self) -> &StageCostEstimator {
        &self.stage_costs
    }

    pub fn stage_costs_mut(&mut self) -> &mut StageCostEstimator {
        &mut self.stage_costs
    }

    /// Current historical weight of a key, if any.
    pub fn weight(&self, key: &WeightKey) -> Option<f64> {
        self.snapshot.get(key).copied()
    }

    /// Pulls a fresh table from the stats source.
    ///
    /// Finite weights replace their entries; keys absent from the new table
    /// keep their old weight. A failing source leaves the snapshot untouched.
    /// Returns the number of entries written.
    pub fn refresh_snapshot(&mut self) -> usize {
        let Some(source) = &self.source else {
            return 0;
        };
        match source.snapshot() {
            Ok(table) => {
                let mut written = 0;
                for (key, stats) in table {
                    let weight = calculate_type_weight(&stats, &self.config);
                    if weight.is_finite() {
                        self.snapshot.insert(key, weight);
                        written += 1;
                    }
                }
                debug!(written, "JobRanker::refresh_snapshot: refreshed");
                written
            }
            Err(e) => {
                warn!(error = %e, "JobRanker::refresh_snapshot: source failed, keeping stale weights");
                0
            }
        }
    }

    /// Scores one job and stores `estimated_ram_mb` and `calculated_score`
    /// on it. Malformed jobs score negative infinity.
    pub fn score_job(&self, job: &mut Job, now_ms: i64) -> f64 {
        let score = if job.id.is_empty() {
            f64::NEG_INFINITY
        } else {
            let ram = self.estimate_ram_mb(job);
            job.estimated_ram_mb = Some(ram);

            let weight = self.historical_weight(job);
            let age_ms = (now_ms - job.created_at_ms).max(0) as f64;
            let aging = (1.0 + age_ms / self.config.t_aging_ms).min(self.config.max_aging);
            let complexity =
                1.0 + job.stage_count() as f64 * self.config.stage_complexity_modifier;

            let score = job.priority as f64 * aging * complexity * weight / ram.sqrt();
            if score.is_finite() {
                score
            } else {
                f64::NEG_INFINITY
            }
        };
        job.calculated_score = Some(score);
        score
    }

    /// Refreshes the snapshot once, scores every job and returns them in
    /// descending score order. Equal scores keep their input order.
    pub fn score_jobs(&mut self, jobs: Vec<Job>, now_ms: i64) -> Vec<Job> {
        self.refresh_snapshot();
        let mut scored: Vec<(f64, Job)> = jobs
            .into_iter()
            .map(|mut job| {
                let score = self.score_job(&mut job, now_ms);
                (score, job)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        debug!(count = scored.len(), "JobRanker::score_jobs: ranked batch");
        scored.into_iter().map(|(_, job)| job).collect()
    }

    /// Peak RAM estimate (MB) across the job's stages.
    pub fn estimate_ram_mb(&self, job: &Job) -> f64 {
        let peak = if job.stages.is_empty() {
            self.stage_ram_mb(job.size_bytes, job.supports_streaming, self.config.expansion_multiplier)
        } else {
            job.stages
                .iter()
                .map(|stage| {
                    let size = stage.size_bytes.unwrap_or(job.size_bytes);
                    let streaming = stage.supports_streaming.unwrap_or(job.supports_streaming);
                    let expansion = self
                        .stage_costs
                        .learned_expansion(&job.pipeline, &stage.extension)
                        .unwrap_or(self.config.expansion_multiplier);
                    self.stage_ram_mb(size, streaming, expansion)
                })
                .fold(0.0, f64::max)
        };
        peak.max(self.config.min_ram_mb)
    }

    /// Per-stage blend weights of a job, softmax when the job asks for it.
    pub fn stage_weights(&self, job: &Job) -> StageWeights {
        self.stage_costs
            .stage_weights(&job.pipeline, &job.stages, job.softmax_stage_weights)
    }

    fn stage_ram_mb(&self, size_bytes: u64, streaming: bool, expansion: f64) -> f64 {
        if streaming {
            self.config.base_stream_ram_mb.max(self.config.min_ram_mb)
        } else {
            (size_bytes as f64 / BYTES_PER_MB * expansion).max(self.config.min_ram_mb)
        }
    }

    fn historical_weight(&self, job: &Job) -> f64 {
        self.snapshot
            .get(&WeightKey::composite(job.job_type.as_str(), job.pipeline.as_str()))
            .or_else(|| self.snapshot.get(&WeightKey::job_type(job.job_type.as_str())))
            .copied()
            .unwrap_or(1.0)
    }
}

impl Default for JobRanker {
    fn default() -> Self {
        Self::new(RankerConfig::default())
    }
}

impl std::fmt::Debug for JobRanker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRanker")
            .field("config", &self.config)
            .field("snapshot_len", &self.snapshot.len())
            .field("has_source", &self.source.is_some())
            .field("stage_costs", &self.stage_costs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::models::Stage;
    use crate::ranking::{StageObservation, TypeStats};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const MB: u64 = 1024 * 1024;

    fn job(id: &str, priority: i32, size: u64) -> Job {
        Job::new(id).with_priority(priority).with_size(size).with_created_at(0)
    }

    #[test]
    fn test_reference_score() {
        let ranker = JobRanker::default();
        let mut j = job("J1", 5, MB);
        let score = ranker.score_job(&mut j, 0);
        assert!((score - 5.0 / 3.0f64.sqrt()).abs() < 1e-12);
        assert_eq!(j.estimated_ram_mb, Some(3.0));
        assert_eq!(j.calculated_score, Some(score));
    }

    #[test]
    fn test_aging_capped() {
        let ranker = JobRanker::default();
        let mut young = job("a", 1, MB);
        let mut half = job("b", 1, MB);
        let mut old = job("c", 1, MB);
        let base = ranker.score_job(&mut young, 0);
        let s_half = ranker.score_job(&mut half, 1_800_000);
        let s_old = ranker.score_job(&mut old, 100 * 3_600_000);
        assert!((s_half / base - 1.5).abs() < 1e-12);
        assert!((s_old / base - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_streaming_and_floor() {
        let ranker = JobRanker::default();
        let streaming = Job::new("s").with_size(10 * MB).with_streaming(true);
        assert_eq!(ranker.estimate_ram_mb(&streaming), 250.0);
        let empty = Job::new("e");
        assert_eq!(ranker.estimate_ram_mb(&empty), 0.1);
    }

    #[test]
    fn test_stage_peak_and_complexity() {
        let ranker = JobRanker::default();
        let mut j = job("J", 1, MB)
            .with_stage(Stage::new("csv"))
            .with_stage(Stage::new("zip").with_size(4 * MB))
            .with_stage(Stage::new("mp4").with_streaming(true).with_size(MB));
        assert_eq!(ranker.estimate_ram_mb(&j), 250.0);
        let score = ranker.score_job(&mut j, 0);
        assert!((score - 1.15 / 250.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_learned_expansion_used() {
        let mut ranker = JobRanker::default();
        ranker.stage_costs_mut().observe(&StageObservation {
            pipeline: "ocr".into(),
            extension: "pdf".into(),
            peak_ram_bytes: 8 * MB,
            file_size_bytes: MB,
            execution_time_sec: 1.0,
            timestamp_ms: 0,
        });
        let j = job("J", 1, MB)
            .with_pipeline("ocr")
            .with_stage(Stage::new(".PDF"))
            .with_stage(Stage::new("txt"));
        assert_eq!(ranker.estimate_ram_mb(&j), 8.0);

        // Whole-job estimate ignores stage history.
        let plain = job("P", 1, MB).with_pipeline("ocr");
        assert_eq!(ranker.estimate_ram_mb(&plain), 3.0);
    }

    #[test]
    fn test_historical_weight_lookup_order() {
        let source = || -> Result<HashMap<WeightKey, TypeStats>> {
            Ok(HashMap::from([
                (
                    WeightKey::composite("img", "thumb"),
                    TypeStats::new(200, 0).with_timing(100.0, 10.0),
                ),
                (WeightKey::job_type("img"), TypeStats::new(0, 500)),
            ]))
        };
        let mut ranker = JobRanker::default().with_stats_source(Arc::new(source));
        assert_eq!(ranker.refresh_snapshot(), 2);

        let mut composite = job("a", 1, MB).with_type("img").with_pipeline("thumb");
        let mut bare = job("b", 1, MB).with_type("img").with_pipeline("other");
        let mut unknown = job("c", 1, MB).with_type("doc");
        let base = 1.0 / 3.0f64.sqrt();
        assert!((ranker.score_job(&mut composite, 0) - 1.5 * base).abs() < 1e-12);
        assert!((ranker.score_job(&mut bare, 0) - 0.1 * base).abs() < 1e-12);
        assert!((ranker.score_job(&mut unknown, 0) - base).abs() < 1e-12);
    }

    #[test]
    fn test_failing_source_keeps_stale_snapshot() {
        let fail = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fail);
        let source = move || -> Result<HashMap<WeightKey, TypeStats>> {
            if flag.load(Ordering::SeqCst) {
                Err(Error::store("type_stats", "connection reset"))
            } else {
                Ok(HashMap::from([(
                    WeightKey::job_type("img"),
                    TypeStats::new(0, 500),
                )]))
            }
        };
        let mut ranker = JobRanker::default().with_stats_source(Arc::new(source));
        ranker.refresh_snapshot();
        fail.store(true, Ordering::SeqCst);
        assert_eq!(ranker.refresh_snapshot(), 0);
        assert_eq!(ranker.weight(&WeightKey::job_type("img")), Some(0.1));
    }

    #[test]
    fn test_score_jobs_sorted_and_stable() {
        let mut ranker = JobRanker::default();
        let jobs = vec![
            job("low", 1, MB),
            job("tie_a", 3, MB),
            job("", 9, MB),
            job("high", 9, MB),
            job("tie_b", 3, MB),
        ];
        let ranked = ranker.score_jobs(jobs, 0);
        let ids: Vec<&str> = ranked.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "tie_a", "tie_b", "low", ""]);
        assert_eq!(ranked[4].calculated_score, Some(f64::NEG_INFINITY));
    }

    #[test]
    fn test_stage_weights_follow_job_profile() {
        let ranker = JobRanker::default();
        let j = job("J", 1, MB)
            .with_stage(Stage::new("a"))
            .with_stage(Stage::new("b"))
            .with_softmax_stage_weights();
        let w = ranker.stage_weights(&j);
        assert_eq!(w.weights.len(), 2);
        assert!((w.weights[0] - 0.5).abs() < 1e-12);
    }
}
