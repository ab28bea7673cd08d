//! Per-cycle dispatch report.
//!
//! # Metrics
//!
//! | Metric | Definition |
//! |--------|-----------|
//! | Assignment rate | assigned / batched |
//! | Node balance | distinct nodes used / assignments |
//! | Exploration share | explored assignments / assignments |
//! | Write-back backlog | patches still staged after the flush |

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::dispatching::TickOutcome;
use crate::models::{Assignment, NodeState};

/// What one dispatch cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    /// Sequence number, starting at 1.
    pub cycle: u64,
    /// Cycle clock (epoch ms).
    pub now_ms: i64,
    /// Jobs newly taken into the registry.
    pub fetched: usize,
    /// Jobs promoted one tier by aging.
    pub promoted: usize,
    /// Jobs pulled into the ranked batch.
    pub batched: usize,
    pub assignments: Vec<Assignment>,
    pub skipped: Vec<String>,
    pub deferred: Vec<String>,
    pub halted: bool,
    pub cluster_pressure: f64,
    /// Assigned jobs the store accepted.
    pub acknowledged: usize,
    /// Assigned jobs returned to pending because the store refused them.
    pub released: usize,
    /// Patches the store persisted this cycle.
    pub flushed: usize,
    /// Patches still staged after the flush.
    pub pending_writes: usize,
    /// Collaborator calls that failed this cycle.
    pub store_errors: usize,
    /// Node count per health state after the desirability tick.
    pub node_states: BTreeMap<NodeState, usize>,
}

impl CycleReport {
    pub(crate) fn new(cycle: u64, now_ms: i64) -> Self {
        Self {
            cycle,
            now_ms,
            ..Default::default()
        }
    }

    pub(crate) fn absorb_tick(&mut self, tick: TickOutcome) {
        self.assignments = tick.assignments;
        self.skipped = tick.skipped;
        self.deferred = tick.deferred;
        self.halted = tick.halted;
        self.cluster_pressure = tick.cluster_pressure;
    }

    /// Fraction of the batch that was assigned (1.0 for an empty batch).
    pub fn assignment_rate(&self) -> f64 {
        if self.batched == 0 {
            1.0
        } else {
            self.assignments.len() as f64 / self.batched as f64
        }
    }

    /// Distinct nodes used per assignment (0.0 without assignments).
    pub fn node_balance(&self) -> f64 {
        if self.assignments.is_empty() {
            return 0.0;
        }
        let nodes: HashSet<&str> = self.assignments.iter().map(|a| a.node_id.as_str()).collect();
        nodes.len() as f64 / self.assignments.len() as f64
    }

    /// Fraction of assignments chosen by exploration.
    pub fn exploration_share(&self) -> f64 {
        if self.assignments.is_empty() {
            return 0.0;
        }
        let explored = self.assignments.iter().filter(|a| a.explored).count();
        explored as f64 / self.assignments.len() as f64
    }

    /// Whether the cycle ran without collaborator failures and without
    /// leaving writes behind.
    pub fn is_clean(&self) -> bool {
        self.store_errors == 0 && self.pending_writes == 0
    }
}
