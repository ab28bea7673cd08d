//! Job-to-node assignment (dispatcher output).

use serde::{Deserialize, Serialize};

/// A job assigned to a node in one dispatch tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Assigned job ID.
    pub job_id: String,
    /// Target node ID.
    pub node_id: String,
    /// Winning bid (desirability × affinity) at assignment time.
    pub bid: f64,
    /// Whether the node came from exploration rather than the greedy choice.
    pub explored: bool,
}

impl Assignment {
    /// Creates a greedy assignment.
    pub fn new(job_id: impl Into<String>, node_id: impl Into<String>, bid: f64) -> Self {
        Self {
            job_id: job_id.into(),
            node_id: node_id.into(),
            bid,
            explored: false,
        }
    }

    /// Marks the assignment as exploratory.
    pub fn explored(mut self) -> Self {
        self.explored = true;
        self
    }

    /// The `(job_id, node_id)` pair.
    pub fn pair(&self) -> (&str, &str) {
        (&self.job_id, &self.node_id)
    }
}
