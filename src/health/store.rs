//! Node metric store.
//!
//! Holds one [`NodeMetricSnapshot`] per node. Incoming metric reports are
//! applied field by field through the update strategy of their
//! [`MetricKey`]; keys without a strategy land in `extra` unchanged.

use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::NodeMetricSnapshot;

/// Metric store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricStoreConfig {
    /// EMA factor for cpu, memory, queue length and throughput.
    pub alpha: f64,
    /// EMA factor for average job time.
    pub beta: f64,
    /// Heartbeat age after which a node is marked not alive (ms).
    pub heartbeat_timeout_ms: i64,
}

impl Default for MetricStoreConfig {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            beta: 0.2,
            heartbeat_timeout_ms: 30_000,
        }
    }
}

/// Named metric in a node report.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetricKey {
    CpuEma,
    MemoryEma,
    QueueLenEma,
    Throughput,
    AvgJobTime,
    LastHeartbeat,
    Alive,
    SuccessCount,
    ErrorCount,
    AvailableMemory,
    NetworkLatency,
    /// Any other signal; overwritten as reported.
    Custom(String),
}

impl FromStr for MetricKey {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "cpu_ema" => MetricKey::CpuEma,
            "memory_ema" => MetricKey::MemoryEma,
            "queue_len_ema" | "queue_ema" => MetricKey::QueueLenEma,
            "throughput" | "throughput_ema" => MetricKey::Throughput,
            "avg_job_time" | "avg_job_time_sec" => MetricKey::AvgJobTime,
            "last_heartbeat" => MetricKey::LastHeartbeat,
            "alive" => MetricKey::Alive,
            "success_count" => MetricKey::SuccessCount,
            "error_count" => MetricKey::ErrorCount,
            "available_memory" | "available_memory_mb" => MetricKey::AvailableMemory,
            "network_latency" | "network_latency_ms" => MetricKey::NetworkLatency,
            other => MetricKey::Custom(other.to_string()),
        })
    }
}

/// Per-node metric table.
#[derive(Debug, Clone, Default)]
pub struct NodeMetricStore {
    config: MetricStoreConfig,
    nodes: BTreeMap<String, NodeMetricSnapshot>,
    deleted: BTreeSet<String>,
}

impl NodeMetricStore {
    pub fn new(config: MetricStoreConfig) -> Self {
        Self {
            config,
            nodes: BTreeMap::new(),
            deleted: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> &MetricStoreConfig {
        &self.config
    }

    /// Loads rows fetched from the external store.
    ///
    /// Unseen nodes are inserted whole. For a known node the row refreshes
    /// what the node itself reports: load EMAs, capacity, latency, heartbeat,
    /// liveness and custom signals. Outcome counters keep the larger of the
    /// local and reported value, and a locally learned job time is kept over
    /// the reported one. Returns the number of nodes seen for the first time.
    pub fn ingest(&mut self, rows: impl IntoIterator<Item = NodeMetricSnapshot>) -> usize {
        let mut added = 0;
        for row in rows {
            match self.nodes.get_mut(&row.node_id) {
                Some(node) => merge_reported(node, row),
                None => {
                    self.nodes.insert(row.node_id.clone(), row);
                    added += 1;
                }
            }
        }
        if added > 0 {
            info!(added, total = self.nodes.len(), "NodeMetricStore::ingest: new nodes");
        }
        added
    }

    /// Applies one report to a node. Unknown node returns false.
    pub fn update(&mut self, node_id: &str, report: &[(MetricKey, f64)], now_ms: i64) -> bool {
        let alpha = self.config.alpha;
        let beta = self.config.beta;
        let Some(node) = self.nodes.get_mut(node_id) else {
            return false;
        };
        for (key, value) in report {
            let value = *value;
            match key {
                MetricKey::CpuEma => node.cpu_ema = ema(alpha, value, node.cpu_ema),
                MetricKey::MemoryEma => node.memory_ema = ema(alpha, value, node.memory_ema),
                MetricKey::QueueLenEma => {
                    node.queue_len_ema = ema(alpha, value, node.queue_len_ema)
                }
                MetricKey::Throughput => {
                    node.throughput_ema = ema(alpha, value, node.throughput_ema)
                }
                // A zero duration carries no timing information.
                MetricKey::AvgJobTime if value == 0.0 => {}
                MetricKey::AvgJobTime => {
                    node.avg_job_time_sec = ema(beta, value, node.avg_job_time_sec)
                }
                MetricKey::LastHeartbeat => {
                    node.last_heartbeat_ms = value as i64;
                    node.alive = true;
                }
                MetricKey::Alive => node.alive = true,
                MetricKey::SuccessCount => node.success_count += 1,
                MetricKey::ErrorCount => node.error_count += 1,
                MetricKey::AvailableMemory => node.available_memory_mb = value,
                MetricKey::NetworkLatency => node.network_latency_ms = value,
                MetricKey::Custom(name) => {
                    node.extra.insert(name.clone(), value);
                }
            }
        }
        node.updated_at_ms = now_ms;
        true
    }

    /// Like [`update`](Self::update) with string keys.
    pub fn update_named(&mut self, node_id: &str, report: &[(&str, f64)], now_ms: i64) -> bool {
        let parsed: Vec<(MetricKey, f64)> = report
            .iter()
            .map(|(name, value)| {
                let key = match name.parse::<MetricKey>() {
                    Ok(key) => key,
                    Err(never) => match never {},
                };
                (key, *value)
            })
            .collect();
        self.update(node_id, &parsed, now_ms)
    }

    /// Removes a node and records it for deletion write-back.
    pub fn remove(&mut self, node_id: &str) -> bool {
        if self.nodes.remove(node_id).is_none() {
            return false;
        }
        self.deleted.insert(node_id.to_string());
        debug!(node_id, "NodeMetricStore::remove: node removed");
        true
    }

    /// Drains the ids removed since the last call.
    pub fn take_deleted(&mut self) -> Vec<String> {
        std::mem::take(&mut self.deleted).into_iter().collect()
    }

    /// Marks nodes whose heartbeat is older than the configured timeout as
    /// not alive. Returns the ids that flipped.
    pub fn mark_stale(&mut self, now_ms: i64) -> Vec<String> {
        let timeout = self.config.heartbeat_timeout_ms;
        let mut flipped = Vec::new();
        for (id, node) in &mut self.nodes {
            if node.alive && now_ms - node.last_heartbeat_ms > timeout {
                node.alive = false;
                node.updated_at_ms = now_ms;
                flipped.push(id.clone());
            }
        }
        if !flipped.is_empty() {
            info!(count = flipped.len(), "NodeMetricStore::mark_stale: heartbeat timeout");
        }
        flipped
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeMetricSnapshot> {
        self.nodes.get(node_id)
    }

    /// Snapshots in node-id order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeMetricSnapshot> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn merge_reported(node: &mut NodeMetricSnapshot, row: NodeMetricSnapshot) {
    node.cpu_ema = row.cpu_ema;
    node.memory_ema = row.memory_ema;
    node.queue_len_ema = row.queue_len_ema;
    node.throughput_ema = row.throughput_ema;
    node.available_memory_mb = row.available_memory_mb;
    node.network_latency_ms = row.network_latency_ms;
    node.last_heartbeat_ms = node.last_heartbeat_ms.max(row.last_heartbeat_ms);
    node.alive = row.alive;
    node.updated_at_ms = node.updated_at_ms.max(row.updated_at_ms);
    node.success_count = node.success_count.max(row.success_count);
    node.error_count = node.error_count.max(row.error_count);
    if node.avg_job_time_sec == 0.0 {
        node.avg_job_time_sec = row.avg_job_time_sec;
    }
    node.extra.extend(row.extra);
}

fn ema(factor: f64, input: f64, current: f64) -> f64 {
    factor * input + (1.0 - factor) * current
}
