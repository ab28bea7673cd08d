//! Node health.
//!
//! [`NodeMetricStore`] keeps the raw and EMA-smoothed signals each node
//! reports. [`NodeDesirabilityEngine`] turns them, once per cycle, into a
//! published [`DesirabilityView`] of routing contexts that the dispatcher
//! reads.
//!
//! Only behavioural signals are modelled (latency, load, success rate,
//! liveness). Infrastructure failures show up through those signals or not
//! at all.

mod desirability;
mod state;
mod store;

pub use desirability::{
    cluster_pressure, DesirabilityConfig, DesirabilityView, DesirabilityWeights,
    NodeDesirabilityEngine,
};
pub use state::{next_state, Thresholds};
pub use store::{MetricKey, MetricStoreConfig, NodeMetricStore};
