//! Dispatch cycle runner and cycle reporting.
//!
//! `Coordinator` is the single owner of every scheduling structure. It talks
//! to the outside world only through the [`JobStore`] and [`MetricsSource`]
//! traits and summarizes each cycle in a [`CycleReport`].

mod collaborators;
mod cycle;
mod report;

pub use collaborators::{JobStore, MetricsSource};
pub use cycle::{Coordinator, CycleConfig};
pub use report::CycleReport;
