//! Pending write-back map for the persistent store.
//!
//! Every registry mutation stages a [`JobPatch`] here. Patches for the same
//! job merge (later fields win). Entries stay until the store acknowledges
//! them, so a failed flush is retried on a later cycle.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{JobPatch, JobStatus};

/// Staged status and retry count of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedStatus {
    pub job_id: String,
    pub status: Option<JobStatus>,
    pub retry_count: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct WriteBackQueue {
    staged: BTreeMap<String, JobPatch>,
}

impl WriteBackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a patch, merging with any already-staged patch for the job.
    pub fn stage(&mut self, job_id: &str, patch: JobPatch) {
        match self.staged.get_mut(job_id) {
            Some(existing) => existing.merge(&patch),
            None => {
                self.staged.insert(job_id.to_string(), patch);
            }
        }
    }

    /// Snapshot of every staged patch, ordered by job ID.
    pub fn pending(&self) -> Vec<(String, JobPatch)> {
        self.staged
            .iter()
            .map(|(id, patch)| (id.clone(), patch.clone()))
            .collect()
    }

    /// The staged patch for one job.
    pub fn get(&self, job_id: &str) -> Option<&JobPatch> {
        self.staged.get(job_id)
    }

    /// Drops entries the store acknowledged. Returns how many were cleared.
    pub fn clear<'a>(&mut self, job_ids: impl IntoIterator<Item = &'a str>) -> usize {
        job_ids
            .into_iter()
            .filter(|id| self.staged.remove(*id).is_some())
            .count()
    }

    /// Staged status and retry count per job, for monitoring.
    pub fn status_summary(&self) -> Vec<StagedStatus> {
        self.staged
            .iter()
            .map(|(id, patch)| StagedStatus {
                job_id: id.clone(),
                status: patch.status,
                retry_count: patch.retry_count,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }
}
