//! Configuration validation.
//!
//! Checks every component configuration before the engine is built.
//! Detects:
//! - Out-of-range knobs (non-positive ceilings, smoothing factors outside (0, 1])
//! - Misordered hysteresis thresholds and exploration bounds
//! - Degenerate desirability weights
//! - Malformed, overlapping or duplicate size buckets
//!
//! All problems are collected; validation never stops at the first one.

use std::collections::HashSet;

use crate::affinity::{AffinityConfig, SizeBucket};
use crate::config::EngineConfig;
use crate::dispatching::DispatcherConfig;
use crate::health::{DesirabilityConfig, MetricStoreConfig};
use crate::ranking::{RankerConfig, StageCostConfig};
use crate::registry::RegistryConfig;
use crate::scheduler::CycleConfig;

/// Validation result.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// A validation error.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Error category.
    pub kind: ValidationErrorKind,
    /// Human-readable description.
    pub message: String,
}

/// Categories of validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// A numeric knob is outside its allowed range.
    OutOfRange,
    /// Two size buckets cover a common size.
    OverlappingBuckets,
    /// Two size buckets share a name.
    DuplicateBucket,
    /// A size bucket with `min > max`, or no buckets at all.
    InvalidBucket,
    /// Desirability weights are negative or sum to zero.
    InvalidWeights,
    /// Hysteresis thresholds are not ordered.
    InvalidThresholds,
    /// Exploration bounds are not ordered within [0, 1].
    InvalidEpsilon,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Validates a complete engine configuration.
///
/// # Returns
/// `Ok(())` if all checks pass, `Err(errors)` with all detected issues.
pub fn validate_config(config: &EngineConfig) -> ValidationResult {
    let mut errors = Vec::new();

    check_registry(&config.registry, &mut errors);
    check_ranker(&config.ranker, &mut errors);
    check_stage_cost(&config.stage_cost, &mut errors);
    check_affinity(&config.affinity, &mut errors);
    check_metric_store(&config.metric_store, &mut errors);
    check_desirability(&config.desirability, &mut errors);
    check_dispatcher(&config.dispatcher, &mut errors);
    check_cycle(&config.cycle, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn out_of_range(errors: &mut Vec<ValidationError>, message: String) {
    errors.push(ValidationError::new(ValidationErrorKind::OutOfRange, message));
}

fn positive(errors: &mut Vec<ValidationError>, name: &str, value: f64) {
    if !(value.is_finite() && value > 0.0) {
        out_of_range(errors, format!("{name} must be positive, got {value}"));
    }
}

fn non_negative(errors: &mut Vec<ValidationError>, name: &str, value: f64) {
    if !(value.is_finite() && value >= 0.0) {
        out_of_range(errors, format!("{name} must be non-negative, got {value}"));
    }
}

/// Smoothing factors live in (0, 1].
fn smoothing(errors: &mut Vec<ValidationError>, name: &str, value: f64) {
    if !(value > 0.0 && value <= 1.0) {
        out_of_range(errors, format!("{name} must be in (0, 1], got {value}"));
    }
}

fn check_registry(cfg: &RegistryConfig, errors: &mut Vec<ValidationError>) {
    if cfg.num_priorities == 0 {
        out_of_range(errors, "registry.num_priorities must be at least 1".into());
    }
    if cfg.aging_threshold_ms <= 0 {
        out_of_range(
            errors,
            format!(
                "registry.aging_threshold_ms must be positive, got {}",
                cfg.aging_threshold_ms
            ),
        );
    }
    if cfg.tombstone_limit == 0 {
        out_of_range(errors, "registry.tombstone_limit must be at least 1".into());
    }
}

fn check_ranker(cfg: &RankerConfig, errors: &mut Vec<ValidationError>) {
    if !(cfg.max_aging >= 1.0 && cfg.max_aging.is_finite()) {
        out_of_range(
            errors,
            format!("ranker.max_aging must be at least 1, got {}", cfg.max_aging),
        );
    }
    positive(errors, "ranker.t_aging_ms", cfg.t_aging_ms);
    positive(errors, "ranker.w_min", cfg.w_min);
    positive(errors, "ranker.w_max", cfg.w_max);
    if cfg.w_min > cfg.w_max {
        out_of_range(
            errors,
            format!(
                "ranker.w_min ({}) must not exceed ranker.w_max ({})",
                cfg.w_min, cfg.w_max
            ),
        );
    }
    positive(errors, "ranker.epsilon", cfg.epsilon);
    positive(errors, "ranker.n_min", cfg.n_min);
    non_negative(errors, "ranker.base_stream_ram_mb", cfg.base_stream_ram_mb);
    positive(errors, "ranker.expansion_multiplier", cfg.expansion_multiplier);
    non_negative(errors, "ranker.stage_complexity_modifier", cfg.stage_complexity_modifier);
    positive(errors, "ranker.min_ram_mb", cfg.min_ram_mb);
}

fn check_stage_cost(cfg: &StageCostConfig, errors: &mut Vec<ValidationError>) {
    smoothing(errors, "stage_cost.expansion_alpha", cfg.expansion_alpha);
    smoothing(errors, "stage_cost.time_alpha", cfg.time_alpha);
    non_negative(errors, "stage_cost.gamma_expansion", cfg.gamma_expansion);
    non_negative(errors, "stage_cost.gamma_explicit_ram", cfg.gamma_explicit_ram);
    non_negative(errors, "stage_cost.gamma_time", cfg.gamma_time);
    positive(errors, "stage_cost.rho_min", cfg.rho_min);
    positive(errors, "stage_cost.tau_min", cfg.tau_min);
    if cfg.rho_min > cfg.rho_max {
        out_of_range(errors, "stage_cost.rho_min must not exceed rho_max".into());
    }
    if cfg.tau_min > cfg.tau_max {
        out_of_range(errors, "stage_cost.tau_min must not exceed tau_max".into());
    }
    positive(errors, "stage_cost.confidence_samples", cfg.confidence_samples);
    positive(errors, "stage_cost.sigmoid_k", cfg.sigmoid_k);
    positive(errors, "stage_cost.softmax_temp", cfg.softmax_temp);
    if !(cfg.damping_beta >= 0.0 && cfg.damping_beta < 1.0) {
        out_of_range(
            errors,
            format!("stage_cost.damping_beta must be in [0, 1), got {}", cfg.damping_beta),
        );
    }
    positive(errors, "stage_cost.delta_floor", cfg.delta_floor);
    positive(errors, "stage_cost.pipeline_fallback_margin", cfg.pipeline_fallback_margin);
    positive(errors, "stage_cost.floor_multiplier", cfg.floor_multiplier);
}

fn check_affinity(cfg: &AffinityConfig, errors: &mut Vec<ValidationError>) {
    check_buckets(&cfg.buckets, errors);
    non_negative(errors, "affinity.variance_penalty", cfg.variance_penalty);
    smoothing(errors, "affinity.ema_alpha", cfg.ema_alpha);
    positive(errors, "affinity.min_samples", cfg.min_samples);
    positive(errors, "affinity.decay_tau_sec", cfg.decay_tau_sec);
    positive(errors, "affinity.prior_alpha", cfg.prior_alpha);
    positive(errors, "affinity.prior_beta", cfg.prior_beta);
    smoothing(errors, "affinity.adaptation_rate", cfg.adaptation_rate);
    if !(0.0..=1.0).contains(&cfg.fallback_score) {
        out_of_range(
            errors,
            format!("affinity.fallback_score must be in [0, 1], got {}", cfg.fallback_score),
        );
    }
    positive(errors, "affinity.performance_epsilon", cfg.performance_epsilon);
}

fn check_buckets(buckets: &[SizeBucket], errors: &mut Vec<ValidationError>) {
    if buckets.is_empty() {
        errors.push(ValidationError::new(
            ValidationErrorKind::InvalidBucket,
            "affinity.buckets must not be empty",
        ));
        return;
    }

    let mut names = HashSet::new();
    for bucket in buckets {
        if !names.insert(bucket.name.as_str()) {
            errors.push(ValidationError::new(
                ValidationErrorKind::DuplicateBucket,
                format!("Duplicate size bucket: {}", bucket.name),
            ));
        }
        if bucket.min > bucket.max {
            errors.push(ValidationError::new(
                ValidationErrorKind::InvalidBucket,
                format!(
                    "Size bucket '{}' has min {} above max {}",
                    bucket.name, bucket.min, bucket.max
                ),
            ));
        }
    }

    let mut ordered: Vec<&SizeBucket> = buckets.iter().filter(|b| b.min <= b.max).collect();
    ordered.sort_by_key(|b| (b.min, b.max));
    for pair in ordered.windows(2) {
        if pair[1].min <= pair[0].max {
            errors.push(ValidationError::new(
                ValidationErrorKind::OverlappingBuckets,
                format!(
                    "Size buckets '{}' and '{}' overlap",
                    pair[0].name, pair[1].name
                ),
            ));
        }
    }
}

fn check_metric_store(cfg: &MetricStoreConfig, errors: &mut Vec<ValidationError>) {
    smoothing(errors, "metric_store.alpha", cfg.alpha);
    smoothing(errors, "metric_store.beta", cfg.beta);
    if cfg.heartbeat_timeout_ms <= 0 {
        out_of_range(
            errors,
            format!(
                "metric_store.heartbeat_timeout_ms must be positive, got {}",
                cfg.heartbeat_timeout_ms
            ),
        );
    }
}

fn check_desirability(cfg: &DesirabilityConfig, errors: &mut Vec<ValidationError>) {
    positive(errors, "desirability.max_queue", cfg.max_queue);
    positive(errors, "desirability.max_wait_sec", cfg.max_wait_sec);
    positive(errors, "desirability.max_memory_mb", cfg.max_memory_mb);
    positive(errors, "desirability.max_throughput", cfg.max_throughput);
    positive(errors, "desirability.max_cpu", cfg.max_cpu);
    non_negative(errors, "desirability.k1", cfg.k1);
    non_negative(errors, "desirability.k2", cfg.k2);
    smoothing(errors, "desirability.beta", cfg.beta);
    smoothing(errors, "desirability.queue_critical_pct", cfg.queue_critical_pct);

    let w = &cfg.weights;
    let all = [w.cpu, w.memory, w.wait, w.success, w.error, w.throughput];
    if all.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
        errors.push(ValidationError::new(
            ValidationErrorKind::InvalidWeights,
            "desirability.weights must all be non-negative",
        ));
    } else if w.sum() <= 0.0 {
        errors.push(ValidationError::new(
            ValidationErrorKind::InvalidWeights,
            "desirability.weights must have a positive sum",
        ));
    }

    let ordered = cfg.t_overloaded > 0.0
        && cfg.t_overloaded < cfg.t_degraded
        && cfg.t_degraded < 1.0
        && cfg.delta >= 0.0;
    if !ordered {
        errors.push(ValidationError::new(
            ValidationErrorKind::InvalidThresholds,
            format!(
                "desirability thresholds need 0 < t_overloaded ({}) < t_degraded ({}) < 1 and delta ({}) >= 0",
                cfg.t_overloaded, cfg.t_degraded, cfg.delta
            ),
        ));
    }
}

fn check_dispatcher(cfg: &DispatcherConfig, errors: &mut Vec<ValidationError>) {
    let ordered = cfg.epsilon_min >= 0.0
        && cfg.epsilon_min <= cfg.epsilon_max
        && cfg.epsilon_max <= 1.0;
    if !ordered {
        errors.push(ValidationError::new(
            ValidationErrorKind::InvalidEpsilon,
            format!(
                "dispatcher epsilon bounds need 0 <= epsilon_min ({}) <= epsilon_max ({}) <= 1",
                cfg.epsilon_min, cfg.epsilon_max
            ),
        ));
    }
    non_negative(errors, "dispatcher.pressure_k", cfg.pressure_k);
    positive(errors, "dispatcher.softmax_temp", cfg.softmax_temp);
    non_negative(errors, "dispatcher.dogpile_penalty", cfg.dogpile_penalty);
    non_negative(errors, "dispatcher.score_floor", cfg.score_floor);
    positive(errors, "dispatcher.max_wait_sec", cfg.max_wait_sec);
}

fn check_cycle(cfg: &CycleConfig, errors: &mut Vec<ValidationError>) {
    if cfg.coordinator_id.trim().is_empty() {
        out_of_range(errors, "cycle.coordinator_id must not be empty".into());
    }
    if cfg.fetch_limit == 0 {
        out_of_range(errors, "cycle.fetch_limit must be at least 1".into());
    }
    if cfg.batch_size == 0 {
        out_of_range(errors, "cycle.batch_size must be at least 1".into());
    }
}
