//! Job ranking.
//!
//! Orders a pending batch so the dispatcher sees the most valuable work
//! first. Value grows with priority, age, structural complexity and the
//! historical reliability of the job type, and shrinks with the square root
//! of the estimated memory cost.
//!
//! # Components
//!
//! - [`JobRanker`]: per-batch scoring and stable descending sort
//! - [`calculate_type_weight`]: Bayesian per-type weight from history
//! - [`StageCostEstimator`]: learned per-stage expansion and time

mod ranker;
mod stage_cost;
mod weights;

pub use ranker::{JobRanker, RankerConfig};
pub use stage_cost::{
    normalize_extension, StageCostConfig, StageCostEstimator, StageCostKey, StageCostRecord,
    StageObservation, StageWeights,
};
pub use weights::{calculate_type_weight, SharedStatsSource, TypeStats, TypeStatsSource, WeightKey};
