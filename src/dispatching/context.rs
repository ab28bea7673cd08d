//! Simulated cluster state for one assignment tick.

use crate::health::{cluster_pressure, DesirabilityView};

/// Optimistic per-node state mutated as jobs are committed within a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedNode {
    pub node_id: String,
    /// Memory still free (MB).
    pub memory_mb: f64,
    /// Queue length including jobs committed this tick.
    pub queue: f64,
    /// Desirability, reduced by each commit this tick.
    pub base_score: f64,
}

/// Runtime state passed through a tick.
///
/// Built from the published desirability view; only alive nodes take part.
#[derive(Debug, Clone, Default)]
pub struct TickContext {
    /// Candidate nodes in node-id order.
    pub nodes: Vec<SimulatedNode>,
    /// Mean sojourn-wait pressure of the candidates (0.0..=1.0).
    pub cluster_pressure: f64,
}

impl TickContext {
    /// Builds the context, measuring cluster pressure over the alive nodes.
    pub fn from_view(view: &DesirabilityView, max_wait_sec: f64) -> Self {
        let pressure = cluster_pressure(
            view.iter()
                .map(|(_, ctx)| &ctx.metrics)
                .filter(|m| m.alive),
            max_wait_sec,
        );
        Self::under_pressure(view, pressure)
    }

    /// Builds the context with a pressure measured by the caller.
    pub fn under_pressure(view: &DesirabilityView, pressure: f64) -> Self {
        let nodes = view
            .iter()
            .filter(|(_, ctx)| ctx.metrics.alive)
            .map(|(node_id, ctx)| SimulatedNode {
                node_id: node_id.to_string(),
                memory_mb: ctx.metrics.available_memory_mb.max(0.0),
                queue: ctx.metrics.queue_len_ema.max(0.0),
                base_score: if ctx.score.is_finite() { ctx.score.max(0.0) } else { 0.0 },
            })
            .collect();
        Self {
            nodes,
            cluster_pressure: pressure.clamp(0.0, 1.0),
        }
    }

    /// Indices of nodes with at least `size_mb` free, and the cluster's
    /// total free memory.
    pub fn capacity_filter(&self, size_mb: f64) -> (Vec<usize>, f64) {
        let mut eligible = Vec::new();
        let mut total = 0.0;
        for (i, node) in self.nodes.iter().enumerate() {
            if node.memory_mb >= size_mb {
                eligible.push(i);
            }
            total += node.memory_mb;
        }
        (eligible, total)
    }

    /// Applies a committed job to a node.
    pub fn commit(&mut self, index: usize, size_mb: f64, penalty: f64, floor: f64) {
        if let Some(node) = self.nodes.get_mut(index) {
            node.queue += 1.0;
            node.memory_mb -= size_mb;
            node.base_score = (node.base_score - penalty).max(floor);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeMetricSnapshot, NodeRoutingContext};

    fn ctx(id: &str, mem: f64, alive: bool) -> NodeRoutingContext {
        NodeRoutingContext::initial(
            NodeMetricSnapshot::new(id)
                .with_available_memory(mem)
                .with_alive(alive),
        )
    }

    #[test]
    fn test_dead_nodes_excluded() {
        let view = DesirabilityView::from_contexts([ctx("a", 10.0, true), ctx("b", 10.0, false)]);
        let tick = TickContext::from_view(&view, 1800.0);
        assert_eq!(tick.len(), 1);
        assert_eq!(tick.nodes[0].node_id, "a");
    }

    #[test]
    fn test_dead_nodes_carry_no_pressure() {
        let busy = |id: &str, alive: bool| {
            NodeRoutingContext::initial(
                NodeMetricSnapshot::new(id)
                    .with_queue(900.0, 1.0)
                    .with_alive(alive),
            )
        };
        let view = DesirabilityView::from_contexts([ctx("a", 10.0, true), busy("b", false)]);
        assert_eq!(TickContext::from_view(&view, 1800.0).cluster_pressure, 0.0);

        let view = DesirabilityView::from_contexts([ctx("a", 10.0, true), busy("b", true)]);
        assert!((TickContext::from_view(&view, 1800.0).cluster_pressure - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_given_pressure_is_kept() {
        let view = DesirabilityView::from_contexts([ctx("a", 10.0, true), ctx("b", 10.0, false)]);
        let tick = TickContext::under_pressure(&view, 0.4);
        assert_eq!(tick.cluster_pressure, 0.4);
        assert_eq!(tick.len(), 1);
    }

    #[test]
    fn test_capacity_filter_and_commit() {
        let view = DesirabilityView::from_contexts([ctx("a", 10.0, true), ctx("b", 3.0, true)]);
        let mut tick = TickContext::from_view(&view, 1800.0);
        let (eligible, total) = tick.capacity_filter(5.0);
        assert_eq!(eligible, vec![0]);
        assert_eq!(total, 13.0);

        tick.commit(0, 5.0, 0.05, 0.01);
        let a = &tick.nodes[0];
        assert_eq!(a.memory_mb, 5.0);
        assert_eq!(a.queue, 1.0);
        assert!((a.base_score - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_penalty_floored() {
        let view = DesirabilityView::from_contexts([ctx("a", 100.0, true)]);
        let mut tick = TickContext::from_view(&view, 1800.0);
        for _ in 0..50 {
            tick.commit(0, 1.0, 0.05, 0.01);
        }
        assert_eq!(tick.nodes[0].base_score, 0.01);
    }
}
