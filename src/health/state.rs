//! Hysteretic node health state machine.
//!
//! ```text
//! HEALTHY ──score < T_D──▶ DEGRADED ──score < T_O──▶ OVERLOADED
//!    ▲                        │  ▲                        │
//!    └──score ≥ T_D + δ───────┘  └──score ≥ T_O + δ───────┘
//! ```
//!
//! At most one transition per evaluation.

use crate::models::NodeState;

/// Hysteresis thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub degraded: f64,
    pub overloaded: f64,
    pub delta: f64,
}

/// Next state for a smoothed score.
pub fn next_state(current: NodeState, score: f64, t: Thresholds) -> NodeState {
    match current {
        NodeState::Healthy if score < t.degraded => NodeState::Degraded,
        NodeState::Healthy => NodeState::Healthy,
        NodeState::Degraded if score >= t.degraded + t.delta => NodeState::Healthy,
        NodeState::Degraded if score < t.overloaded => NodeState::Overloaded,
        NodeState::Degraded => NodeState::Degraded,
        NodeState::Overloaded if score >= t.overloaded + t.delta => NodeState::Degraded,
        NodeState::Overloaded => NodeState::Overloaded,
    }
}
