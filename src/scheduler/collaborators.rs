//! External collaborators of the dispatch cycle.
//!
//! The persistent store owns claim, lease and retry semantics; the
//! coordinator only reads pending work, acknowledges what it assigned and
//! flushes staged patches. These are the only suspension points of a cycle.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Job, JobPatch, NodeMetricSnapshot};

/// Persistent job store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Up to `limit` pending jobs visible to this coordinator.
    async fn fetch_pending_jobs(&self, coordinator_id: &str, limit: usize) -> Result<Vec<Job>>;

    /// Marks jobs as taken by this coordinator.
    async fn acknowledge_jobs(&self, job_ids: &[String], coordinator_id: &str) -> Result<()>;

    /// Persists staged patches. Returns the ids that were written; anything
    /// not returned stays staged for a later flush.
    async fn write_back(&self, patches: &[(String, JobPatch)]) -> Result<Vec<String>>;
}

/// Source of per-node health rows.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn get_coordinator_metrics(&self) -> Result<Vec<NodeMetricSnapshot>>;
}
