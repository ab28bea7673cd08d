//! Worker node model.
//!
//! Nodes are the coordinators' worker processes that execute jobs. The store
//! reports one [`NodeMetricSnapshot`] row per node; the desirability engine
//! derives a [`NodeRoutingContext`] from it every cycle.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Raw and EMA-smoothed health signals for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetricSnapshot {
    /// Unique node identifier.
    pub node_id: String,
    /// CPU utilization EMA (0.0..1.0 of `max_cpu`).
    pub cpu_ema: f64,
    /// Memory usage EMA (MB).
    pub memory_ema: f64,
    /// Queue length EMA (jobs).
    pub queue_len_ema: f64,
    /// Throughput EMA (jobs/sec).
    pub throughput_ema: f64,
    /// Average job execution time EMA (seconds).
    pub avg_job_time_sec: f64,
    /// Lifetime successful jobs.
    pub success_count: u64,
    /// Lifetime failed jobs.
    pub error_count: u64,
    /// Memory currently free for new work (MB).
    pub available_memory_mb: f64,
    /// Last reported network latency (ms).
    pub network_latency_ms: f64,
    /// Last heartbeat (epoch ms).
    pub last_heartbeat_ms: i64,
    /// Liveness flag.
    pub alive: bool,
    /// Last time any field changed (epoch ms).
    pub updated_at_ms: i64,
    /// Signals without a dedicated field, overwritten as reported.
    #[serde(default)]
    pub extra: HashMap<String, f64>,
}

impl NodeMetricSnapshot {
    /// Creates an idle, alive node with no history.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            cpu_ema: 0.0,
            memory_ema: 0.0,
            queue_len_ema: 0.0,
            throughput_ema: 0.0,
            avg_job_time_sec: 0.0,
            success_count: 0,
            error_count: 0,
            available_memory_mb: 0.0,
            network_latency_ms: 0.0,
            last_heartbeat_ms: 0,
            alive: true,
            updated_at_ms: 0,
            extra: HashMap::new(),
        }
    }

    /// Sets CPU and memory EMAs.
    pub fn with_load(mut self, cpu_ema: f64, memory_ema: f64) -> Self {
        self.cpu_ema = cpu_ema;
        self.memory_ema = memory_ema;
        self
    }

    /// Sets queue EMA and average job time.
    pub fn with_queue(mut self, queue_len_ema: f64, avg_job_time_sec: f64) -> Self {
        self.queue_len_ema = queue_len_ema;
        self.avg_job_time_sec = avg_job_time_sec;
        self
    }

    /// Sets throughput EMA.
    pub fn with_throughput(mut self, throughput_ema: f64) -> Self {
        self.throughput_ema = throughput_ema;
        self
    }

    /// Sets lifetime success/error counts.
    pub fn with_counts(mut self, success_count: u64, error_count: u64) -> Self {
        self.success_count = success_count;
        self.error_count = error_count;
        self
    }

    /// Sets free memory.
    pub fn with_available_memory(mut self, available_memory_mb: f64) -> Self {
        self.available_memory_mb = available_memory_mb;
        self
    }

    /// Sets the liveness flag.
    pub fn with_alive(mut self, alive: bool) -> Self {
        self.alive = alive;
        self
    }

    /// Sets the last heartbeat.
    pub fn with_heartbeat(mut self, last_heartbeat_ms: i64) -> Self {
        self.last_heartbeat_ms = last_heartbeat_ms;
        self
    }

    /// Fraction of failed jobs; 0.0 without history.
    pub fn error_rate(&self) -> f64 {
        let total = self.success_count + self.error_count;
        if total == 0 {
            0.0
        } else {
            self.error_count as f64 / total as f64
        }
    }

    /// Fraction of successful jobs; 1.0 without history.
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.error_count;
        if total == 0 {
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    /// Expected wait for a new job (sojourn time), in seconds.
    ///
    /// A missing average job time counts as one second.
    pub fn sojourn_wait_sec(&self) -> f64 {
        let avg = if self.avg_job_time_sec > 0.0 {
            self.avg_job_time_sec
        } else {
            1.0
        };
        self.queue_len_ema.max(0.0) * avg
    }
}

/// Discrete health state of a node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    #[default]
    Healthy,
    Degraded,
    Overloaded,
}

/// Per-cycle routing view of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRoutingContext {
    /// Smoothed desirability (0.0..=1.0).
    pub score: f64,
    /// Hysteretic health state.
    pub state: NodeState,
    /// Metrics the score was computed from.
    pub metrics: NodeMetricSnapshot,
}

impl NodeRoutingContext {
    /// Context for a node that has never been scored.
    pub fn initial(metrics: NodeMetricSnapshot) -> Self {
        Self {
            score: 1.0,
            state: NodeState::Healthy,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_without_history() {
        let node = NodeMetricSnapshot::new("n1");
        assert_eq!(node.error_rate(), 0.0);
        assert_eq!(node.success_rate(), 1.0);
    }

    #[test]
    fn test_rates_with_history() {
        let node = NodeMetricSnapshot::new("n1").with_counts(3, 1);
        assert!((node.success_rate() - 0.75).abs() < 1e-12);
        assert!((node.error_rate() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_sojourn_wait_defaults_job_time() {
        let node = NodeMetricSnapshot::new("n1").with_queue(4.0, 0.0);
        assert!((node.sojourn_wait_sec() - 4.0).abs() < 1e-12);

        let node = NodeMetricSnapshot::new("n1").with_queue(4.0, 30.0);
        assert!((node.sojourn_wait_sec() - 120.0).abs() < 1e-12);
    }

    #[test]
    fn test_initial_context() {
        let ctx = NodeRoutingContext::initial(NodeMetricSnapshot::new("n1"));
        assert_eq!(ctx.score, 1.0);
        assert_eq!(ctx.state, NodeState::Healthy);
    }
}
