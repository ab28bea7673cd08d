//! Scheduling domain models.
//!
//! Plain data types shared by every subsystem. Behaviour lives in the
//! subsystem modules; these types only carry state and small derived values.
//!
//! | Type | Owner | Mutated by |
//! |------|-------|-----------|
//! | `Job` | `JobRegistry` | registry, ranker (via `JobPatch`) |
//! | `NodeMetricSnapshot` | `NodeMetricStore` | metric update strategies |
//! | `NodeRoutingContext` | `NodeDesirabilityEngine` | once per cycle |
//! | `Assignment` | `Dispatcher` output | never |

mod assignment;
mod job;
mod node;

pub use assignment::Assignment;
pub use job::{Job, JobOutcome, JobPatch, JobStatus, Stage, BYTES_PER_MB};
pub use node::{NodeMetricSnapshot, NodeRoutingContext, NodeState};
