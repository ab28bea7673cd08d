//! Scheduling core for a distributed file-processing coordinator.
//!
//! Decides which pending job runs next and on which worker node, balancing
//! job priority and age, predicted resource cost, per-node health and
//! learned node-to-workload affinity.
//!
//! # Modules
//!
//! - **`models`**: Domain types: `Job`, `JobPatch`, `Stage`, `NodeMetricSnapshot`,
//!   `NodeRoutingContext`, `Assignment`, `JobOutcome`
//! - **`registry`**: Tiered priority registry with aging, tombstones and a write-back queue
//! - **`ranking`**: Job scoring (priority × aging × complexity × type weight / √RAM)
//!   and the per-stage cost learner
//! - **`affinity`**: Learned node suitability per (size bucket, pipeline)
//! - **`health`**: Node metric store and smoothed desirability with hysteresis
//! - **`dispatching`**: Capacity-constrained greedy assignment with ε-exploration
//! - **`scheduler`**: The cycle runner tying everything to the job store
//! - **`config`** / **`validation`**: YAML configuration and its checks
//!
//! # Data flow
//!
//! ```text
//! JobStore ──fetch──▶ JobRegistry ──batch──▶ JobRanker ──ranked──▶ Dispatcher ──▶ assignments
//!                                                                    ▲      ▲
//! MetricsSource ──▶ NodeMetricStore ──▶ NodeDesirabilityEngine ──────┘      │
//!                                                   AffinityEngine ─────────┘
//! ```
//!
//! Scoring, ranking and assignment never fail. Only configuration loading
//! and collaborator I/O return [`Error`].

pub mod affinity;
pub mod config;
pub mod dispatching;
pub mod error;
pub mod health;
pub mod logging;
pub mod models;
pub mod ranking;
pub mod registry;
pub mod scheduler;
pub mod validation;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use scheduler::{Coordinator, CycleConfig, CycleReport, JobStore, MetricsSource};
