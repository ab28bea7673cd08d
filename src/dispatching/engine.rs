//! Greedy constrained bipartite assignment.
//!
//! # Algorithm
//!
//! For each ranked job, in order:
//!
//! 1. Capacity filter: nodes whose simulated free memory covers the job.
//!    With no eligible node, halt the batch when the whole cluster is short
//!    of the job size; otherwise skip the job.
//! 2. Bid per eligible node = simulated desirability × affinity.
//! 3. Pick the highest bid, or with probability `ε_j` sample a
//!    low-temperature softmax over the bids.
//! 4. Commit: the node's simulated queue grows by one, its free memory
//!    shrinks by the job size and its desirability drops by a fixed penalty
//!    (floored), so later jobs in the same tick spread out.
//!
//! `ε_j = max(ε_min, ε_max · f_P · f_C · f_S)` where `f_P = exp(-k · pressure)`
//! damps exploration under load, `f_C` damps it for urgent jobs and `f_S`
//! damps it when few nodes are eligible.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::context::TickContext;
use super::exploration::{exploration_rate, softmax_pick};
use crate::affinity::AffinityEngine;
use crate::health::DesirabilityView;
use crate::models::{Assignment, Job};

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub epsilon_max: f64,
    pub epsilon_min: f64,
    /// Pressure decay constant `k` in `f_P = exp(-k · pressure)`.
    pub pressure_k: f64,
    /// Softmax temperature for exploration picks.
    pub softmax_temp: f64,
    /// Desirability removed from a node per commit.
    pub dogpile_penalty: f64,
    /// Desirability never drops below this within a tick.
    pub score_floor: f64,
    /// Sojourn wait ceiling used for cluster pressure (seconds).
    pub max_wait_sec: f64,
    /// Size jobs by their RAM estimate instead of their file size.
    pub use_estimated_ram: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            epsilon_max: 0.05,
            epsilon_min: 0.005,
            pressure_k: 2.0,
            softmax_temp: 0.1,
            dogpile_penalty: 0.05,
            score_floor: 0.01,
            max_wait_sec: 1800.0,
            use_estimated_ram: false,
        }
    }
}

/// Result of one assignment tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    /// Assignments in commit order.
    pub assignments: Vec<Assignment>,
    /// Jobs no node could hold while the cluster as a whole could.
    pub skipped: Vec<String>,
    /// Jobs left unconsidered after a halt, the halting job first.
    pub deferred: Vec<String>,
    /// Whether the batch stopped on cluster-wide memory exhaustion.
    pub halted: bool,
    /// Cluster pressure the tick ran under.
    pub cluster_pressure: f64,
}

/// Assigns ranked jobs to nodes.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Size of a job for capacity purposes (MB).
    pub fn job_size_mb(&self, job: &Job) -> f64 {
        if self.config.use_estimated_ram {
            job.estimated_ram_mb.unwrap_or_else(|| job.size_mb())
        } else {
            job.size_mb()
        }
    }

    /// Runs one tick over jobs already sorted by rank.
    ///
    /// Cluster pressure is measured over the alive nodes of `view`.
    pub fn run_assignment_tick<R: Rng + ?Sized>(
        &self,
        ranked_jobs: &[Job],
        view: &DesirabilityView,
        affinity: &AffinityEngine,
        now_ms: i64,
        rng: &mut R,
    ) -> TickOutcome {
        let tick = TickContext::from_view(view, self.config.max_wait_sec);
        self.assign(tick, ranked_jobs, affinity, now_ms, rng)
    }

    /// Like [`run_assignment_tick`](Self::run_assignment_tick), with the
    /// cluster pressure the caller already used for desirability.
    pub fn run_assignment_tick_under_pressure<R: Rng + ?Sized>(
        &self,
        ranked_jobs: &[Job],
        view: &DesirabilityView,
        affinity: &AffinityEngine,
        pressure: f64,
        now_ms: i64,
        rng: &mut R,
    ) -> TickOutcome {
        let tick = TickContext::under_pressure(view, pressure);
        self.assign(tick, ranked_jobs, affinity, now_ms, rng)
    }

    fn assign<R: Rng + ?Sized>(
        &self,
        mut tick: TickContext,
        ranked_jobs: &[Job],
        affinity: &AffinityEngine,
        now_ms: i64,
        rng: &mut R,
    ) -> TickOutcome {
        let cfg = &self.config;
        let mut outcome = TickOutcome {
            cluster_pressure: tick.cluster_pressure,
            ..Default::default()
        };
        if ranked_jobs.is_empty() || tick.is_empty() {
            outcome.deferred = ranked_jobs.iter().map(|j| j.id.clone()).collect();
            return outcome;
        }

        let pressure_factor = (-cfg.pressure_k * tick.cluster_pressure).exp();
        let total_nodes = tick.len();

        for (position, job) in ranked_jobs.iter().enumerate() {
            let size_mb = self.job_size_mb(job);
            let (eligible, total_free) = tick.capacity_filter(size_mb);

            if eligible.is_empty() {
                if total_free < size_mb {
                    debug!(
                        job_id = %job.id,
                        size_mb,
                        total_free,
                        "Dispatcher::run_assignment_tick: cluster exhausted, halting batch"
                    );
                    outcome.halted = true;
                    outcome.deferred = ranked_jobs[position..].iter().map(|j| j.id.clone()).collect();
                    break;
                }
                trace!(job_id = %job.id, size_mb, "Dispatcher::run_assignment_tick: no node fits, skipping");
                outcome.skipped.push(job.id.clone());
                continue;
            }

            let bids: Vec<f64> = eligible
                .iter()
                .map(|&i| {
                    let node = &tick.nodes[i];
                    let a = affinity.score(&job.pipeline, job.size_bytes, &node.node_id, now_ms);
                    node.base_score * a
                })
                .collect();

            let mut best = 0;
            let mut best_bid = f64::NEG_INFINITY;
            for (k, &bid) in bids.iter().enumerate() {
                if bid > best_bid {
                    best_bid = bid;
                    best = k;
                }
            }

            let epsilon = exploration_rate(
                cfg.epsilon_min,
                cfg.epsilon_max,
                pressure_factor,
                job.priority,
                eligible.len(),
                total_nodes,
            );
            let explored = rng.random::<f64>() < epsilon;
            let chosen = if explored {
                softmax_pick(&bids, cfg.softmax_temp, rng).unwrap_or(best)
            } else {
                best
            };

            let node_index = eligible[chosen];
            let node_id = tick.nodes[node_index].node_id.clone();
            let mut assignment = Assignment::new(job.id.clone(), node_id, bids[chosen]);
            if explored {
                assignment = assignment.explored();
            }
            debug!(
                job_id = %job.id,
                node_id = %assignment.node_id,
                bid = assignment.bid,
                explored,
                "Dispatcher::run_assignment_tick: assigned"
            );
            outcome.assignments.push(assignment);
            tick.commit(node_index, size_mb, cfg.dogpile_penalty, cfg.score_floor);
        }

        outcome
    }
}
