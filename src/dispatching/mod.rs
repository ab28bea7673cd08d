//! Job-to-node dispatching.
//!
//! Consumes a ranked batch, the published desirability view and the
//! affinity learner, and emits ordered job→node assignments that respect
//! each node's free memory.
//!
//! # Usage
//!
//! ```
//! use dfps_sched::affinity::AffinityEngine;
//! use dfps_sched::dispatching::Dispatcher;
//! use dfps_sched::health::DesirabilityView;
//! use rand::rngs::SmallRng;
//! use rand::SeedableRng;
//!
//! let dispatcher = Dispatcher::default();
//! let mut rng = SmallRng::seed_from_u64(7);
//! let outcome = dispatcher.run_assignment_tick(
//!     &[],
//!     &DesirabilityView::default(),
//!     &AffinityEngine::default(),
//!     0,
//!     &mut rng,
//! );
//! assert!(outcome.assignments.is_empty());
//! ```

mod context;
mod engine;
mod exploration;

pub use context::{SimulatedNode, TickContext};
pub use engine::{Dispatcher, DispatcherConfig, TickOutcome};
pub use exploration::{exploration_rate, softmax_pick};
