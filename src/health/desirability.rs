//! Node desirability engine.
//!
//! Turns raw node metrics into a smoothed desirability score in `[0, 1]`
//! plus a hysteretic health state, once per cycle.
//!
//! # Algorithm
//!
//! 1. Normalize each signal into `[0, 1]`, higher meaning better:
//!    cpu, memory, sojourn wait and error rate are inverted against their
//!    ceilings; success rate and throughput are used directly.
//! 2. Boost the `wait` and `throughput` weights by `k1`/`k2` × cluster
//!    pressure.
//! 3. Core score = weighted average of the normalized signals.
//! 4. Circuit breaker: zero for dead nodes; linear collapse once the queue
//!    passes `queue_critical_pct * max_queue`.
//! 5. Smooth against the previous score with factor `beta`.
//! 6. Step the hysteresis machine.
//!
//! Results are published as an immutable [`DesirabilityView`] behind an
//! `Arc`. Readers holding the previous view are unaffected by a tick.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::state::{next_state, Thresholds};
use super::store::NodeMetricStore;
use crate::models::{NodeMetricSnapshot, NodeRoutingContext, NodeState};

/// Base weights of the normalized signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesirabilityWeights {
    pub cpu: f64,
    pub memory: f64,
    pub wait: f64,
    pub success: f64,
    pub error: f64,
    pub throughput: f64,
}

impl Default for DesirabilityWeights {
    fn default() -> Self {
        Self {
            cpu: 0.20,
            memory: 0.15,
            wait: 0.25,
            success: 0.10,
            error: 0.15,
            throughput: 0.15,
        }
    }
}

impl DesirabilityWeights {
    pub fn sum(&self) -> f64 {
        self.cpu + self.memory + self.wait + self.success + self.error + self.throughput
    }

    fn under_pressure(&self, k1: f64, k2: f64, pressure: f64) -> Self {
        Self {
            wait: self.wait + k1 * pressure,
            throughput: self.throughput + k2 * pressure,
            ..self.clone()
        }
    }
}

/// Desirability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesirabilityConfig {
    /// Queue length at which a node is cut off entirely.
    pub max_queue: f64,
    /// Sojourn wait ceiling (seconds).
    pub max_wait_sec: f64,
    /// Memory usage ceiling (MB).
    pub max_memory_mb: f64,
    /// Throughput ceiling (jobs/sec).
    pub max_throughput: f64,
    /// CPU ceiling.
    pub max_cpu: f64,
    pub weights: DesirabilityWeights,
    /// Pressure boost of the wait weight.
    pub k1: f64,
    /// Pressure boost of the throughput weight.
    pub k2: f64,
    /// Smoothing factor of the new raw score.
    pub beta: f64,
    /// Fraction of `max_queue` where the queue breaker starts.
    pub queue_critical_pct: f64,
    pub t_degraded: f64,
    pub t_overloaded: f64,
    /// Recovery margin above each threshold.
    pub delta: f64,
}

impl Default for DesirabilityConfig {
    fn default() -> Self {
        Self {
            max_queue: 30.0,
            max_wait_sec: 1800.0,
            max_memory_mb: 1024.0,
            max_throughput: 500.0,
            max_cpu: 1.0,
            weights: DesirabilityWeights::default(),
            k1: 0.10,
            k2: 0.10,
            beta: 0.2,
            queue_critical_pct: 0.80,
            t_degraded: 0.80,
            t_overloaded: 0.40,
            delta: 0.05,
        }
    }
}

impl DesirabilityConfig {
    fn thresholds(&self) -> Thresholds {
        Thresholds {
            degraded: self.t_degraded,
            overloaded: self.t_overloaded,
            delta: self.delta,
        }
    }
}

/// Immutable per-cycle routing contexts, keyed by node id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesirabilityView {
    contexts: BTreeMap<String, NodeRoutingContext>,
}

impl DesirabilityView {
    /// Builds a view from contexts, for callers that score nodes elsewhere.
    pub fn from_contexts(contexts: impl IntoIterator<Item = NodeRoutingContext>) -> Self {
        Self {
            contexts: contexts
                .into_iter()
                .map(|ctx| (ctx.metrics.node_id.clone(), ctx))
                .collect(),
        }
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeRoutingContext> {
        self.contexts.get(node_id)
    }

    /// Contexts in node-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &NodeRoutingContext)> {
        self.contexts.iter().map(|(id, ctx)| (id.as_str(), ctx))
    }

    /// Number of nodes per health state.
    pub fn state_counts(&self) -> BTreeMap<NodeState, usize> {
        let mut counts = BTreeMap::new();
        for ctx in self.contexts.values() {
            *counts.entry(ctx.state).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Mean sojourn-wait pressure of a set of nodes.
///
/// Each node contributes `min(1, queue_ema * avg_job_time / max_wait)`.
/// An empty set has zero pressure.
pub fn cluster_pressure<'a>(
    nodes: impl IntoIterator<Item = &'a NodeMetricSnapshot>,
    max_wait_sec: f64,
) -> f64 {
    let (total, count) = nodes.into_iter().fold((0.0, 0usize), |(total, count), node| {
        (total + unit(node.sojourn_wait_sec() / max_wait_sec), count + 1)
    });
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// Double-buffered desirability scoring.
#[derive(Debug, Clone, Default)]
pub struct NodeDesirabilityEngine {
    config: DesirabilityConfig,
    visible: Arc<DesirabilityView>,
}

impl NodeDesirabilityEngine {
    pub fn new(config: DesirabilityConfig) -> Self {
        Self {
            config,
            visible: Arc::new(DesirabilityView::default()),
        }
    }

    pub fn config(&self) -> &DesirabilityConfig {
        &self.config
    }

    /// Replaces the configuration. Takes effect on the next tick.
    pub fn update_config(&mut self, config: DesirabilityConfig) {
        info!("NodeDesirabilityEngine::update_config: configuration replaced");
        self.config = config;
    }

    /// The currently published view.
    pub fn view(&self) -> Arc<DesirabilityView> {
        Arc::clone(&self.visible)
    }

    /// Routing context of one node in the published view.
    pub fn node(&self, node_id: &str) -> Option<&NodeRoutingContext> {
        self.visible.get(node_id)
    }

    /// Scores every node in the store and publishes a new view.
    ///
    /// Each node continues from its context in the previous view; a node
    /// seen for the first time starts at score 1.0, HEALTHY.
    pub fn run_tick(&mut self, store: &NodeMetricStore, pressure: f64) -> Arc<DesirabilityView> {
        let pressure = unit(pressure);
        let weights = self
            .config
            .weights
            .under_pressure(self.config.k1, self.config.k2, pressure);

        let mut next = BTreeMap::new();
        for metrics in store.iter() {
            let (prev_score, prev_state) = self
                .visible
                .get(&metrics.node_id)
                .map(|ctx| (ctx.score, ctx.state))
                .unwrap_or((1.0, NodeState::Healthy));

            let raw = self.breaker(self.core_score(metrics, &weights), metrics);
            let score = unit((1.0 - self.config.beta) * prev_score + self.config.beta * raw);
            let state = next_state(prev_state, score, self.config.thresholds());
            if state != prev_state {
                debug!(
                    node_id = %metrics.node_id,
                    from = ?prev_state,
                    to = ?state,
                    score,
                    "NodeDesirabilityEngine::run_tick: state change"
                );
            }
            next.insert(
                metrics.node_id.clone(),
                NodeRoutingContext {
                    score,
                    state,
                    metrics: metrics.clone(),
                },
            );
        }

        self.visible = Arc::new(DesirabilityView { contexts: next });
        self.view()
    }

    /// Unsmoothed score of one node under the given pressure.
    pub fn raw_score(&self, metrics: &NodeMetricSnapshot, pressure: f64) -> f64 {
        let weights = self
            .config
            .weights
            .under_pressure(self.config.k1, self.config.k2, unit(pressure));
        self.breaker(self.core_score(metrics, &weights), metrics)
    }

    fn core_score(&self, m: &NodeMetricSnapshot, w: &DesirabilityWeights) -> f64 {
        let cfg = &self.config;
        let cpu = invert(m.cpu_ema, cfg.max_cpu);
        let memory = invert(m.memory_ema, cfg.max_memory_mb);
        let wait = invert(m.sojourn_wait_sec(), cfg.max_wait_sec);
        let error = invert(m.error_rate(), 1.0);
        let success = unit(m.success_rate());
        let throughput = unit(m.throughput_ema / cfg.max_throughput);

        let total = w.sum();
        if total <= 0.0 {
            return 0.0;
        }
        let weighted = w.cpu * cpu
            + w.memory * memory
            + w.wait * wait
            + w.success * success
            + w.error * error
            + w.throughput * throughput;
        unit(weighted / total)
    }

    fn breaker(&self, core: f64, m: &NodeMetricSnapshot) -> f64 {
        if !m.alive {
            return 0.0;
        }
        let critical = self.config.max_queue * self.config.queue_critical_pct;
        let backpressure = if m.queue_len_ema > critical {
            ((self.config.max_queue - m.queue_len_ema) / (self.config.max_queue - critical))
                .max(0.0)
        } else {
            1.0
        };
        unit(core * backpressure)
    }
}

fn invert(value: f64, max: f64) -> f64 {
    unit(1.0 - value / max)
}

/// Clamps into `[0, 1]`; NaN maps to 0.
fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::MetricKey;
    use proptest::prelude::*;

    fn light() -> NodeMetricSnapshot {
        NodeMetricSnapshot::new("light")
            .with_load(0.1, 100.0)
            .with_queue(1.0, 10.0)
            .with_throughput(100.0)
            .with_counts(100, 0)
    }

    fn heavy() -> NodeMetricSnapshot {
        NodeMetricSnapshot::new("heavy")
            .with_load(0.95, 1000.0)
            .with_queue(20.0, 60.0)
            .with_throughput(5.0)
            .with_counts(50, 50)
    }

    fn store_of(nodes: Vec<NodeMetricSnapshot>) -> NodeMetricStore {
        let mut store = NodeMetricStore::default();
        store.ingest(nodes);
        store
    }

    #[test]
    fn test_light_node_beats_heavy_node() {
        let mut engine = NodeDesirabilityEngine::default();
        let store = store_of(vec![light(), heavy()]);
        let pressure = cluster_pressure(store.iter(), 1800.0);
        let view = engine.run_tick(&store, pressure);
        assert!(view.get("light").unwrap().score > view.get("heavy").unwrap().score);
    }

    #[test]
    fn test_load_alone_ranks_nodes() {
        let mut engine = NodeDesirabilityEngine::default();
        let max_mem = engine.config().max_memory_mb;
        let idle = NodeMetricSnapshot::new("a").with_load(0.1, 0.1 * max_mem);
        let loaded = NodeMetricSnapshot::new("b").with_load(0.95, 0.9 * max_mem);
        assert!(engine.raw_score(&idle, 0.0) > engine.raw_score(&loaded, 0.0));

        let store = store_of(vec![idle, loaded]);
        let view = engine.run_tick(&store, cluster_pressure(store.iter(), 1800.0));
        assert!(view.get("a").unwrap().score > view.get("b").unwrap().score);
    }

    #[test]
    fn test_first_tick_smooths_from_one() {
        let mut engine = NodeDesirabilityEngine::default();
        let store = store_of(vec![light()]);
        let raw = engine.raw_score(store.get("light").unwrap(), 0.0);
        let view = engine.run_tick(&store, 0.0);
        let expected = 0.8 + 0.2 * raw;
        assert!((view.get("light").unwrap().score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_dead_node_decays_into_degraded() {
        let mut engine = NodeDesirabilityEngine::default();
        let store = store_of(vec![light().with_alive(false)]);
        assert_eq!(engine.raw_score(store.get("light").unwrap(), 0.0), 0.0);

        let first = engine.run_tick(&store, 0.0);
        let ctx = first.get("light").unwrap();
        assert!((ctx.score - 0.8).abs() < 1e-12);
        assert_eq!(ctx.state, NodeState::Healthy);

        let second = engine.run_tick(&store, 0.0);
        assert_eq!(second.get("light").unwrap().state, NodeState::Degraded);
        // The earlier view is unchanged.
        assert_eq!(first.get("light").unwrap().state, NodeState::Healthy);
    }

    #[test]
    fn test_queue_breaker_collapses_linearly() {
        let engine = NodeDesirabilityEngine::default();
        let calm = NodeMetricSnapshot::new("n").with_queue(24.0, 0.0);
        let tight = NodeMetricSnapshot::new("n").with_queue(27.0, 0.0);
        let full = NodeMetricSnapshot::new("n").with_queue(30.0, 0.0);
        assert!(engine.raw_score(&calm, 0.0) > 0.0);
        let core_tight = engine.core_score(&tight, &engine.config().weights);
        assert!((engine.raw_score(&tight, 0.0) - 0.5 * core_tight).abs() < 1e-12);
        assert_eq!(engine.raw_score(&full, 0.0), 0.0);
    }

    #[test]
    fn test_pressure_shifts_weight_to_wait() {
        let engine = NodeDesirabilityEngine::default();
        let queued = NodeMetricSnapshot::new("q").with_queue(10.0, 90.0);
        assert!(engine.raw_score(&queued, 1.0) < engine.raw_score(&queued, 0.0));
    }

    #[test]
    fn test_cluster_pressure() {
        let nodes = vec![
            NodeMetricSnapshot::new("a").with_queue(900.0, 1.0),
            NodeMetricSnapshot::new("b").with_queue(10.0, 1000.0),
        ];
        assert!((cluster_pressure(&nodes, 1800.0) - 0.75).abs() < 1e-12);
        assert_eq!(cluster_pressure(std::iter::empty(), 1800.0), 0.0);
    }

    #[test]
    fn test_removed_node_leaves_view() {
        let mut engine = NodeDesirabilityEngine::default();
        let mut store = store_of(vec![light(), heavy()]);
        engine.run_tick(&store, 0.0);
        store.remove("heavy");
        let view = engine.run_tick(&store, 0.0);
        assert_eq!(view.len(), 1);
        assert!(engine.node("heavy").is_none());
    }

    #[test]
    fn test_update_config_applies_next_tick() {
        let mut engine = NodeDesirabilityEngine::default();
        let store = store_of(vec![light()]);
        engine.update_config(DesirabilityConfig {
            beta: 1.0,
            ..Default::default()
        });
        assert_eq!(engine.config().beta, 1.0);
        let raw = engine.raw_score(store.get("light").unwrap(), 0.0);
        let view = engine.run_tick(&store, 0.0);
        assert!((view.get("light").unwrap().score - raw).abs() < 1e-12);
    }

    #[test]
    fn test_state_counts() {
        let view = DesirabilityView::from_contexts([
            NodeRoutingContext::initial(NodeMetricSnapshot::new("a")),
            NodeRoutingContext::initial(NodeMetricSnapshot::new("b")),
        ]);
        assert_eq!(view.state_counts().get(&NodeState::Healthy), Some(&2));
    }

    fn arb_report() -> impl Strategy<Value = Vec<(MetricKey, f64)>> {
        let key = prop_oneof![
            Just(MetricKey::CpuEma),
            Just(MetricKey::MemoryEma),
            Just(MetricKey::QueueLenEma),
            Just(MetricKey::Throughput),
            Just(MetricKey::AvgJobTime),
            Just(MetricKey::SuccessCount),
            Just(MetricKey::ErrorCount),
            Just(MetricKey::Alive),
        ];
        prop::collection::vec((key, -1e6f64..1e6f64), 0..8)
    }

    proptest! {
        #[test]
        fn test_score_stays_in_unit_interval(
            reports in prop::collection::vec(arb_report(), 1..20),
            pressures in prop::collection::vec(-2.0f64..3.0, 1..20),
            alive in any::<bool>(),
        ) {
            let mut engine = NodeDesirabilityEngine::default();
            let mut store = store_of(vec![
                NodeMetricSnapshot::new("n1").with_alive(alive),
                NodeMetricSnapshot::new("n2"),
            ]);
            for (i, report) in reports.iter().enumerate() {
                store.update("n1", report, i as i64);
                let pressure = pressures[i % pressures.len()];
                let view = engine.run_tick(&store, pressure);
                for (_, ctx) in view.iter() {
                    prop_assert!((0.0..=1.0).contains(&ctx.score));
                }
            }
        }
    }
}
