//! Per-stage cost learning.
//!
//! Learns, for each `(pipeline, extension)` pair, how much memory a stage
//! needs relative to its input (expansion ratio) and how long it runs. The
//! learned costs serve two consumers:
//!
//! - the ranker, which replaces its static expansion multiplier with the
//!   learned ratio when one exists;
//! - stage weighting, which splits a job's cost across its stages either
//!   proportionally or through a temperature-controlled softmax.
//!
//! # Fallbacks
//!
//! An unseen extension borrows the first learned value of the same pipeline
//! (expansion scaled up by `pipeline_fallback_margin`). An unseen pipeline
//! uses the global floor (`rho_min * floor_multiplier`, `tau_min`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::Stage;

/// Stage cost estimator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageCostConfig {
    /// EMA smoothing of the expansion ratio.
    pub expansion_alpha: f64,
    /// EMA smoothing of execution time.
    pub time_alpha: f64,
    /// Cost weight of the expansion ratio.
    pub gamma_expansion: f64,
    /// Cost weight of an explicit RAM requirement (per MB).
    pub gamma_explicit_ram: f64,
    /// Cost weight of execution time (per second).
    pub gamma_time: f64,
    /// Expansion ratio clamp.
    pub rho_min: f64,
    pub rho_max: f64,
    /// Execution time clamp (seconds).
    pub tau_min: f64,
    pub tau_max: f64,
    /// Samples needed for full confidence in a record.
    pub confidence_samples: f64,
    /// Steepness of the monitor score mapping `x / (1 + x)`.
    pub sigmoid_k: f64,
    /// Softmax temperature for stage blending.
    pub softmax_temp: f64,
    /// Damping of the monitor score.
    pub damping_beta: f64,
    /// Smallest raw cost.
    pub delta_floor: f64,
    /// Scale applied to a pipeline-level expansion fallback.
    pub pipeline_fallback_margin: f64,
    /// Global expansion floor is `rho_min * floor_multiplier`.
    pub floor_multiplier: f64,
}

impl Default for StageCostConfig {
    fn default() -> Self {
        Self {
            expansion_alpha: 0.15,
            time_alpha: 0.2,
            gamma_expansion: 1.0,
            gamma_explicit_ram: 0.001,
            gamma_time: 0.1,
            rho_min: 0.01,
            rho_max: 100.0,
            tau_min: 0.01,
            tau_max: 86_400.0,
            confidence_samples: 5.0,
            sigmoid_k: 0.5,
            softmax_temp: 1.0,
            damping_beta: 0.95,
            delta_floor: 1e-6,
            pipeline_fallback_margin: 1.2,
            floor_multiplier: 10.0,
        }
    }
}

/// `(pipeline, extension)` key. Extensions are stored without a leading dot,
/// lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageCostKey {
    pub pipeline: String,
    pub extension: String,
}

impl StageCostKey {
    pub fn new(pipeline: impl Into<String>, extension: &str) -> Self {
        Self {
            pipeline: pipeline.into(),
            extension: normalize_extension(extension),
        }
    }
}

/// Strips one leading dot and lowercases.
pub fn normalize_extension(ext: &str) -> String {
    ext.strip_prefix('.').unwrap_or(ext).to_lowercase()
}

/// Learned cost of one `(pipeline, extension)` pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageCostRecord {
    /// EMA of peak RAM bytes per input byte.
    pub ema_ratio: Option<f64>,
    /// EMA of execution time (seconds).
    pub ema_time: Option<f64>,
    pub samples: u64,
    /// Last observation (epoch seconds).
    pub last_seen_sec: i64,
    /// Damped cost mapped into (0, 1), for monitoring.
    pub stored_score: Option<f64>,
}

/// One completed stage execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageObservation {
    pub pipeline: String,
    pub extension: String,
    pub peak_ram_bytes: u64,
    pub file_size_bytes: u64,
    pub execution_time_sec: f64,
    pub timestamp_ms: i64,
}

/// Per-stage blend weights and the raw costs they came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageWeights {
    pub weights: Vec<f64>,
    pub raws: Vec<f64>,
}

/// Learns per-stage expansion ratio and execution time.
#[derive(Debug, Clone, Default)]
pub struct StageCostEstimator {
    config: StageCostConfig,
    records: BTreeMap<StageCostKey, StageCostRecord>,
}

impl StageCostEstimator {
    pub fn new(config: StageCostConfig) -> Self {
        Self {
            config,
            records: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &StageCostConfig {
        &self.config
    }

    /// Records one stage execution. Returns false for an empty pipeline.
    pub fn observe(&mut self, obs: &StageObservation) -> bool {
        if obs.pipeline.is_empty() {
            return false;
        }
        let cfg = &self.config;
        let key = StageCostKey::new(obs.pipeline.clone(), &obs.extension);

        let file_bytes = obs.file_size_bytes.max(1) as f64;
        let ratio = (obs.peak_ram_bytes as f64 / file_bytes).clamp(cfg.rho_min, cfg.rho_max);
        let tau = if obs.execution_time_sec.is_finite() && obs.execution_time_sec > 0.0 {
            obs.execution_time_sec.clamp(cfg.tau_min, cfg.tau_max)
        } else {
            cfg.tau_min
        };

        let record = self.records.entry(key).or_default();
        record.ema_ratio = Some(match record.ema_ratio {
            Some(prev) => cfg.expansion_alpha * ratio + (1.0 - cfg.expansion_alpha) * prev,
            None => ratio,
        });
        record.ema_time = Some(match record.ema_time {
            Some(prev) => cfg.time_alpha * tau + (1.0 - cfg.time_alpha) * prev,
            None => tau,
        });
        record.samples += 1;
        record.last_seen_sec = obs.timestamp_ms.div_euclid(1000);

        let mapped = rational_sigmoid(raw_from_record(cfg, record, 0.0), cfg.sigmoid_k);
        record.stored_score = Some(match record.stored_score {
            Some(prev) => cfg.damping_beta * prev + (1.0 - cfg.damping_beta) * mapped,
            None => mapped,
        });

        debug!(
            pipeline = %obs.pipeline,
            extension = %obs.extension,
            ratio,
            tau,
            "StageCostEstimator::observe: updated"
        );
        true
    }

    /// The record for an exact `(pipeline, extension)` pair.
    pub fn record(&self, pipeline: &str, extension: &str) -> Option<&StageCostRecord> {
        self.records.get(&StageCostKey::new(pipeline, extension))
    }

    /// Learned expansion ratio for an exact pair, without fallbacks.
    pub fn learned_expansion(&self, pipeline: &str, extension: &str) -> Option<f64> {
        self.record(pipeline, extension).and_then(|r| r.ema_ratio)
    }

    /// Expected expansion ratio with pipeline and global fallbacks.
    pub fn predict_expansion(&self, pipeline: &str, extension: &str) -> f64 {
        if let Some(ratio) = self.learned_expansion(pipeline, extension) {
            return ratio;
        }
        if let Some(ratio) = self.pipeline_records(pipeline).find_map(|r| r.ema_ratio) {
            return ratio * self.config.pipeline_fallback_margin;
        }
        self.config.rho_min * self.config.floor_multiplier
    }

    /// Expected execution time (seconds) with pipeline and global fallbacks.
    pub fn predict_time(&self, pipeline: &str, extension: &str) -> f64 {
        if let Some(time) = self.record(pipeline, extension).and_then(|r| r.ema_time) {
            return time;
        }
        self.pipeline_records(pipeline)
            .find_map(|r| r.ema_time)
            .unwrap_or(self.config.tau_min)
    }

    fn pipeline_records<'a>(
        &'a self,
        pipeline: &'a str,
    ) -> impl Iterator<Item = &'a StageCostRecord> + 'a {
        let start = StageCostKey {
            pipeline: pipeline.to_string(),
            extension: String::new(),
        };
        self.records
            .range(start..)
            .take_while(move |(k, _)| k.pipeline == pipeline)
            .map(|(_, r)| r)
    }

    /// Raw cost of one stage.
    pub fn stage_raw(&self, pipeline: &str, stage: &Stage) -> f64 {
        let cfg = &self.config;
        let explicit = stage.ram_mb.unwrap_or(0.0);
        match self.record(pipeline, &stage.extension) {
            Some(record) => raw_from_record(cfg, record, explicit),
            None => {
                let rho = self.predict_expansion(pipeline, &stage.extension);
                let tau = self.predict_time(pipeline, &stage.extension);
                let raw = cfg.gamma_expansion * rho
                    + cfg.gamma_time * tau
                    + cfg.gamma_explicit_ram * explicit;
                raw.max(cfg.delta_floor)
            }
        }
    }

    /// Splits a job's cost across its stages.
    ///
    /// With `use_softmax`, weights are `softmax(raw / softmax_temp)`;
    /// otherwise each raw cost is divided by their sum.
    pub fn stage_weights(&self, pipeline: &str, stages: &[Stage], use_softmax: bool) -> StageWeights {
        let raws: Vec<f64> = stages.iter().map(|s| self.stage_raw(pipeline, s)).collect();
        let weights = if use_softmax {
            softmax(&raws, self.config.softmax_temp, self.config.delta_floor)
        } else {
            let sum: f64 = raws.iter().sum();
            let sum = if sum > 0.0 { sum } else { self.config.delta_floor };
            raws.iter().map(|r| r / sum).collect()
        };
        StageWeights { weights, raws }
    }

    /// Number of learned pairs.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn raw_from_record(cfg: &StageCostConfig, record: &StageCostRecord, explicit_ram_mb: f64) -> f64 {
    let rho = record.ema_ratio.unwrap_or(cfg.rho_min);
    let tau = record.ema_time.unwrap_or(cfg.tau_min);
    let raw = cfg.gamma_expansion * rho + cfg.gamma_time * tau + cfg.gamma_explicit_ram * explicit_ram_mb;
    let conf = (record.samples as f64 / cfg.confidence_samples).min(1.0);
    (raw * conf + cfg.delta_floor * (1.0 - conf)).max(cfg.delta_floor)
}

fn rational_sigmoid(raw: f64, k: f64) -> f64 {
    let x = k * raw;
    x / (1.0 + x)
}

fn softmax(raws: &[f64], temperature: f64, floor: f64) -> Vec<f64> {
    let Some(max) = raws.iter().copied().reduce(f64::max) else {
        return Vec::new();
    };
    let exps: Vec<f64> = raws.iter().map(|r| ((r - max) / temperature).exp()).collect();
    let sum: f64 = exps.iter().sum();
    let sum = if sum > 0.0 { sum } else { floor };
    exps.iter().map(|e| e / sum).collect()
}
