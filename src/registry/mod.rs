//! Priority-stratified job registry.
//!
//! Holds every job the coordinator has claimed, split into `num_priorities`
//! tiers (tier 0 = most urgent). Within a tier, jobs keep their ingestion
//! order; the store already returns them oldest-first, so no sorting happens
//! here.
//!
//! # Anti-starvation
//!
//! [`JobRegistry::promote_aged`] moves every job that has sat in a non-top
//! tier for longer than `aging_threshold_ms` up by exactly one tier and resets
//! its arrival stamp. A job entering tier `t` therefore reaches tier 0 after
//! at most `t` aging periods (plus one sweep interval per hop).
//!
//! # Space reclamation
//!
//! Removal and promotion leave tombstones in the tier slot lists. Once the
//! tombstone counter reaches `tombstone_limit`, every tier is rebuilt and the
//! counter resets.

mod tier;
mod writeback;

pub use writeback::{StagedStatus, WriteBackQueue};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::{Job, JobPatch, JobStatus};
use tier::Tier;

/// Registry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Number of priority tiers.
    pub num_priorities: usize,
    /// Residence time after which a job is promoted one tier (ms).
    pub aging_threshold_ms: i64,
    /// Tombstones tolerated before all tiers are compacted.
    pub tombstone_limit: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            num_priorities: 5,
            aging_threshold_ms: 15 * 60 * 1000,
            tombstone_limit: 1024,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    job: Job,
    tier: usize,
    slot: usize,
}

/// Tiered store of claimed jobs with a pending write-back map.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    config: RegistryConfig,
    jobs: HashMap<String, Entry>,
    tiers: Vec<Tier>,
    write_back: WriteBackQueue,
    tombstones: usize,
    compactions: u64,
}

impl JobRegistry {
    /// Creates an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        let num_tiers = config.num_priorities.max(1);
        debug!(?config, "JobRegistry::new: called");
        Self {
            config,
            jobs: HashMap::new(),
            tiers: (0..num_tiers).map(|_| Tier::new()).collect(),
            write_back: WriteBackQueue::new(),
            tombstones: 0,
            compactions: 0,
        }
    }

    /// Number of tiers.
    pub fn num_tiers(&self) -> usize {
        self.tiers.len()
    }

    /// The lowest-priority tier index.
    pub fn lowest_tier(&self) -> usize {
        self.tiers.len() - 1
    }

    /// Tier a job with the given priority enters at.
    ///
    /// Priority `>= num_tiers - 1` maps to tier 0; priority `<= 0` maps to the
    /// lowest tier.
    pub fn tier_for_priority(&self, priority: i32) -> usize {
        let lowest = self.lowest_tier();
        let clamped = priority.clamp(0, lowest as i32) as usize;
        lowest - clamped
    }

    /// Priority value that corresponds to a tier.
    pub fn priority_for_tier(&self, tier: usize) -> i32 {
        (self.lowest_tier() - tier.min(self.lowest_tier())) as i32
    }

    /// Adds claimed jobs at the tail of their tiers.
    ///
    /// A job that is already registered and still pending is left untouched.
    /// One registered in any other status was handed back by the store after
    /// its lease lapsed, so it returns to pending in its current tier and
    /// takes the store's retry count. Returns how many jobs were added or
    /// returned to pending.
    pub fn ingest(&mut self, jobs: impl IntoIterator<Item = Job>, now_ms: i64) -> usize {
        let mut added = 0;
        for mut job in jobs {
            if let Some(entry) = self.jobs.get_mut(&job.id) {
                if entry.job.status == JobStatus::Pending {
                    debug!(job_id = %job.id, "JobRegistry::ingest: already registered, skipping");
                    continue;
                }
                debug!(
                    job_id = %job.id,
                    from = ?entry.job.status,
                    tier = entry.tier,
                    "JobRegistry::ingest: re-offered, back to pending"
                );
                entry.job.status = JobStatus::Pending;
                entry.job.assigned_node = None;
                entry.job.retry_count = job.retry_count;
                let patch = JobPatch {
                    status: Some(JobStatus::Pending),
                    retry_count: Some(job.retry_count),
                    ..Default::default()
                };
                self.write_back.stage(&job.id, patch);
                added += 1;
                continue;
            }
            let tier = self.tier_for_priority(job.priority);
            job.status = JobStatus::Pending;
            if job.arrival_ms.is_none() {
                job.arrival_ms = Some(now_ms);
            }
            let slot = self.tiers[tier].push(job.id.clone());
            debug!(job_id = %job.id, tier, "JobRegistry::ingest: inserted");
            self.jobs.insert(job.id.clone(), Entry { job, tier, slot });
            added += 1;
        }
        added
    }

    /// Applies a patch to a registered job and stages it for write-back.
    ///
    /// Returns false if the job is unknown.
    pub fn update(&mut self, job_id: &str, patch: JobPatch) -> bool {
        let Some(entry) = self.jobs.get_mut(job_id) else {
            debug!(%job_id, "JobRegistry::update: unknown job");
            return false;
        };
        entry.job.apply(&patch);
        self.write_back.stage(job_id, patch);
        true
    }

    /// Collects up to `max_size` pending jobs, most urgent tier first.
    ///
    /// Each returned job is switched to [`JobStatus::Queued`] in place and a
    /// status write-back is staged. The returned values are copies.
    pub fn dispatch_batch(&mut self, max_size: usize) -> Vec<Job> {
        let mut batch = Vec::with_capacity(max_size);
        if max_size == 0 {
            return batch;
        }
        'tiers: for tier in &self.tiers {
            for (_, job_id) in tier.live_ids() {
                let Some(entry) = self.jobs.get_mut(job_id) else {
                    continue;
                };
                if entry.job.status != JobStatus::Pending {
                    continue;
                }
                entry.job.status = JobStatus::Queued;
                self.write_back
                    .stage(job_id, JobPatch::status(JobStatus::Queued));
                batch.push(entry.job.clone());
                if batch.len() >= max_size {
                    break 'tiers;
                }
            }
        }
        debug!(count = batch.len(), max_size, "JobRegistry::dispatch_batch: collected");
        batch
    }

    /// Returns queued or unacknowledged assigned jobs to pending so a later
    /// batch picks them up again.
    ///
    /// Returns how many jobs were switched back.
    pub fn requeue<'a>(&mut self, job_ids: impl IntoIterator<Item = &'a str>) -> usize {
        let mut count = 0;
        for job_id in job_ids {
            let Some(entry) = self.jobs.get_mut(job_id) else {
                continue;
            };
            if matches!(entry.job.status, JobStatus::Queued | JobStatus::Assigned) {
                entry.job.status = JobStatus::Pending;
                entry.job.assigned_node = None;
                self.write_back
                    .stage(job_id, JobPatch::status(JobStatus::Pending));
                count += 1;
            }
        }
        count
    }

    /// Promotes every job that outstayed the aging threshold by one tier.
    ///
    /// Returns the IDs promoted in this sweep.
    pub fn promote_aged(&mut self, now_ms: i64) -> Vec<String> {
        let threshold = self.config.aging_threshold_ms;
        let mut due: Vec<(String, usize)> = Vec::new();
        for (tier_idx, tier) in self.tiers.iter().enumerate().skip(1) {
            for (_, job_id) in tier.live_ids() {
                let Some(entry) = self.jobs.get(job_id) else {
                    continue;
                };
                let arrival = entry.job.arrival_ms.unwrap_or(now_ms);
                if now_ms - arrival > threshold {
                    due.push((job_id.to_string(), tier_idx));
                }
            }
        }

        for (job_id, from) in &due {
            let to = from - 1;
            let new_priority = self.priority_for_tier(to);
            let Some(entry) = self.jobs.get_mut(job_id) else {
                continue;
            };
            if self.tiers[*from].vacate(entry.slot) {
                self.tombstones += 1;
            }
            entry.slot = self.tiers[to].push(job_id.clone());
            entry.tier = to;
            entry.job.arrival_ms = Some(now_ms);
            entry.job.priority = entry.job.priority.max(new_priority);

            let patch = JobPatch {
                priority: Some(entry.job.priority),
                arrival_ms: Some(now_ms),
                ..Default::default()
            };
            self.write_back.stage(job_id, patch);
            debug!(%job_id, from, to, "JobRegistry::promote_aged: promoted");
        }

        if !due.is_empty() {
            info!(promoted = due.len(), "aged jobs promoted");
        }
        self.maybe_compact();
        due.into_iter().map(|(id, _)| id).collect()
    }

    /// Deletes jobs and stages deletion markers for the store.
    ///
    /// Unknown IDs are ignored. Returns how many jobs were removed.
    pub fn remove<'a>(&mut self, job_ids: impl IntoIterator<Item = &'a str>) -> usize {
        let mut removed = 0;
        for job_id in job_ids {
            let Some(entry) = self.jobs.remove(job_id) else {
                debug!(%job_id, "JobRegistry::remove: unknown job");
                continue;
            };
            if self.tiers[entry.tier].vacate(entry.slot) {
                self.tombstones += 1;
            }
            self.write_back.stage(job_id, JobPatch::deletion());
            removed += 1;
        }
        self.maybe_compact();
        removed
    }

    fn maybe_compact(&mut self) {
        if self.tombstones < self.config.tombstone_limit {
            return;
        }
        for tier in &mut self.tiers {
            for (job_id, slot) in tier.compact() {
                if let Some(entry) = self.jobs.get_mut(&job_id) {
                    entry.slot = slot;
                }
            }
        }
        info!(tombstones = self.tombstones, "registry compacted");
        self.tombstones = 0;
        self.compactions += 1;
    }

    /// Clears write-back entries the store acknowledged.
    pub fn acknowledge_writes<'a>(&mut self, job_ids: impl IntoIterator<Item = &'a str>) -> usize {
        self.write_back.clear(job_ids)
    }

    /// Every staged write-back patch, ordered by job ID.
    pub fn staged_writes(&self) -> Vec<(String, JobPatch)> {
        self.write_back.pending()
    }

    /// Staged status and retry count per job.
    pub fn status_summary(&self) -> Vec<StagedStatus> {
        self.write_back.status_summary()
    }

    /// The write-back map.
    pub fn write_back(&self) -> &WriteBackQueue {
        &self.write_back
    }

    pub fn get(&self, job_id: &str) -> Option<&Job> {
        self.jobs.get(job_id).map(|e| &e.job)
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    /// Tier a job currently lives in.
    pub fn tier_of(&self, job_id: &str) -> Option<usize> {
        self.jobs.get(job_id).map(|e| e.tier)
    }

    /// Live jobs in a tier, in order.
    pub fn tier_jobs(&self, tier: usize) -> Vec<&Job> {
        self.tiers
            .get(tier)
            .map(|t| {
                t.live_ids()
                    .filter_map(|(_, id)| self.jobs.get(id).map(|e| &e.job))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Live job count of a tier.
    pub fn tier_len(&self, tier: usize) -> usize {
        self.tiers.get(tier).map(|t| t.live_len()).unwrap_or(0)
    }

    /// Physical slots across all tiers, tombstones included.
    pub fn slot_count(&self) -> usize {
        self.tiers.iter().map(|t| t.slot_len()).sum()
    }

    /// Jobs still waiting for a batch.
    pub fn pending_count(&self) -> usize {
        self.jobs
            .values()
            .filter(|e| e.job.status == JobStatus::Pending)
            .count()
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones
    }

    pub fn compaction_count(&self) -> u64 {
        self.compactions
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> JobRegistry {
        JobRegistry::new(RegistryConfig {
            num_priorities: 5,
            aging_threshold_ms: 1_000,
            tombstone_limit: 3,
        })
    }

    fn job(id: &str, priority: i32) -> Job {
        Job::new(id).with_priority(priority).with_size(1024)
    }

    #[test]
    fn test_tier_mapping() {
        let reg = registry();
        assert_eq!(reg.tier_for_priority(0), 4);
        assert_eq!(reg.tier_for_priority(-3), 4);
        assert_eq!(reg.tier_for_priority(4), 0);
        assert_eq!(reg.tier_for_priority(99), 0);
        assert_eq!(reg.priority_for_tier(0), 4);
        assert_eq!(reg.priority_for_tier(4), 0);
    }

    #[test]
    fn test_ingest_assigns_tier_and_arrival() {
        let mut reg = registry();
        let mut preset = job("preset", 0);
        preset.arrival_ms = Some(5);
        assert_eq!(reg.ingest(vec![job("a", 4), job("b", 0), preset], 100), 3);

        assert_eq!(reg.tier_of("a"), Some(0));
        assert_eq!(reg.tier_of("b"), Some(4));
        assert_eq!(reg.get("b").unwrap().arrival_ms, Some(100));
        assert_eq!(reg.get("preset").unwrap().arrival_ms, Some(5));
    }

    #[test]
    fn test_ingest_skips_duplicates() {
        let mut reg = registry();
        reg.ingest(vec![job("a", 0)], 0);
        assert_eq!(reg.ingest(vec![job("a", 4)], 0), 0);
        assert_eq!(reg.tier_of("a"), Some(4));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_reoffered_job_returns_to_pending() {
        let mut reg = registry();
        reg.ingest(vec![job("a", 0)], 0);
        reg.dispatch_batch(1);
        reg.update(
            "a",
            JobPatch {
                status: Some(JobStatus::Acknowledged),
                assigned_node: Some("n1".into()),
                ..Default::default()
            },
        );

        let mut again = job("a", 4);
        again.retry_count = 1;
        assert_eq!(reg.ingest(vec![again], 50), 1);

        let a = reg.get("a").unwrap();
        assert_eq!(a.status, JobStatus::Pending);
        assert_eq!(a.assigned_node, None);
        assert_eq!(a.retry_count, 1);
        assert_eq!(reg.tier_of("a"), Some(4));
        assert_eq!(reg.len(), 1);
        let staged = reg.write_back().get("a").unwrap();
        assert_eq!(staged.status, Some(JobStatus::Pending));
        assert_eq!(staged.retry_count, Some(1));
        assert_eq!(reg.dispatch_batch(1).len(), 1);
    }

    #[test]
    fn test_dispatch_batch_lowest_tier_scenario() {
        let mut reg = registry();
        reg.ingest(vec![job("j1", 0), job("j2", 0), job("j3", 0)], 0);
        assert_eq!(reg.tier_len(4), 3);

        let batch = reg.dispatch_batch(2);
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|j| j.status == JobStatus::Queued));
        assert_eq!(batch[0].id, "j1");
        assert_eq!(batch[1].id, "j2");

        assert_eq!(reg.get("j1").unwrap().status, JobStatus::Queued);
        assert_eq!(reg.get("j2").unwrap().status, JobStatus::Queued);
        assert_eq!(reg.get("j3").unwrap().status, JobStatus::Pending);
        assert_eq!(
            reg.write_back().get("j1").unwrap().status,
            Some(JobStatus::Queued)
        );
        assert!(reg.write_back().get("j3").is_none());
    }

    #[test]
    fn test_dispatch_batch_most_urgent_first() {
        let mut reg = registry();
        reg.ingest(vec![job("low", 0), job("mid", 2), job("top", 4)], 0);
        let ids: Vec<_> = reg.dispatch_batch(10).into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["top", "mid", "low"]);
        assert!(reg.dispatch_batch(10).is_empty());
    }

    #[test]
    fn test_requeue_returns_to_pending() {
        let mut reg = registry();
        reg.ingest(vec![job("a", 0)], 0);
        reg.dispatch_batch(1);
        assert_eq!(reg.requeue(["a", "missing"]), 1);
        assert_eq!(reg.get("a").unwrap().status, JobStatus::Pending);
        assert_eq!(reg.dispatch_batch(1).len(), 1);
    }

    #[test]
    fn test_requeue_releases_assigned_job() {
        let mut reg = registry();
        reg.ingest(vec![job("a", 0), job("b", 0)], 0);
        reg.dispatch_batch(2);
        reg.update(
            "a",
            JobPatch {
                status: Some(JobStatus::Assigned),
                assigned_node: Some("n1".into()),
                ..Default::default()
            },
        );
        reg.update("b", JobPatch::status(JobStatus::Acknowledged));

        assert_eq!(reg.requeue(["a", "b"]), 1);
        let a = reg.get("a").unwrap();
        assert_eq!(a.status, JobStatus::Pending);
        assert_eq!(a.assigned_node, None);
        assert_eq!(reg.get("b").unwrap().status, JobStatus::Acknowledged);
    }

    #[test]
    fn test_update_known_and_unknown() {
        let mut reg = registry();
        reg.ingest(vec![job("a", 0)], 0);

        assert!(!reg.update("missing", JobPatch::status(JobStatus::Assigned)));
        assert!(reg.write_back().get("missing").is_none());

        let patch = JobPatch {
            calculated_score: Some(2.5),
            ..Default::default()
        };
        assert!(reg.update("a", patch));
        assert!(reg.update("a", JobPatch::status(JobStatus::Assigned)));

        let stored = reg.get("a").unwrap();
        assert_eq!(stored.calculated_score, Some(2.5));
        assert_eq!(stored.status, JobStatus::Assigned);

        let staged = reg.write_back().get("a").unwrap();
        assert_eq!(staged.calculated_score, Some(2.5));
        assert_eq!(staged.status, Some(JobStatus::Assigned));
    }

    #[test]
    fn test_promote_one_tier_per_sweep() {
        let mut reg = registry();
        reg.ingest(vec![job("old", 0)], 0);
        reg.ingest(vec![job("fresh", 0)], 900);

        // At exactly the threshold nothing moves.
        assert!(reg.promote_aged(1_000).is_empty());

        let promoted = reg.promote_aged(1_001);
        assert_eq!(promoted, vec!["old".to_string()]);
        assert_eq!(reg.tier_of("old"), Some(3));
        assert_eq!(reg.tier_of("fresh"), Some(4));

        let old = reg.get("old").unwrap();
        assert_eq!(old.arrival_ms, Some(1_001));
        assert_eq!(old.priority, 1);
        assert_eq!(reg.write_back().get("old").unwrap().priority, Some(1));

        // Arrival reset: the next sweep right away promotes nothing.
        assert!(reg.promote_aged(1_002).is_empty());

        // Much later, every resident job moves exactly one tier.
        reg.promote_aged(10_000);
        assert_eq!(reg.tier_of("old"), Some(2));
        assert_eq!(reg.tier_of("fresh"), Some(3));
    }

    #[test]
    fn test_top_tier_never_promoted() {
        let mut reg = registry();
        reg.ingest(vec![job("top", 4)], 0);
        assert!(reg.promote_aged(1_000_000).is_empty());
        assert_eq!(reg.tier_of("top"), Some(0));
    }

    #[test]
    fn test_worst_case_reaches_top() {
        let mut reg = registry();
        reg.ingest(vec![job("starved", 0)], 0);
        let mut now = 0;
        for _ in 0..4 {
            now += 1_001;
            assert_eq!(reg.promote_aged(now).len(), 1);
        }
        assert_eq!(reg.tier_of("starved"), Some(0));
    }

    #[test]
    fn test_remove_and_compaction_once_per_crossing() {
        let mut reg = registry();
        let jobs: Vec<_> = (0..8).map(|i| job(&format!("j{i}"), i % 5)).collect();
        reg.ingest(jobs, 0);
        let before: Vec<Job> = ["j4", "j5", "j6", "j7"]
            .iter()
            .map(|id| reg.get(id).unwrap().clone())
            .collect();

        assert_eq!(reg.remove(["j0", "j1"]), 2);
        assert_eq!(reg.tombstone_count(), 2);
        assert_eq!(reg.compaction_count(), 0);

        assert_eq!(reg.remove(["j2", "unknown"]), 1);
        assert_eq!(reg.compaction_count(), 1);
        assert_eq!(reg.tombstone_count(), 0);
        assert_eq!(reg.slot_count(), 5);

        assert_eq!(reg.remove(["j3"]), 1);
        assert_eq!(reg.compaction_count(), 1);

        for original in before {
            assert_eq!(reg.get(&original.id), Some(&original));
        }
        // Compacted slots are still addressable for later removal.
        assert_eq!(reg.remove(["j7"]), 1);
        assert!(!reg.contains("j7"));
        assert_eq!(reg.tier_jobs(reg.tier_for_priority(2)).len(), 0);
    }

    #[test]
    fn test_remove_stages_deletion_until_acknowledged() {
        let mut reg = registry();
        reg.ingest(vec![job("a", 0), job("b", 0)], 0);
        reg.remove(["a", "b"]);
        assert!(reg.write_back().get("a").unwrap().deleted);

        assert_eq!(reg.acknowledge_writes(["a"]), 1);
        assert!(reg.write_back().get("a").is_none());
        assert!(reg.write_back().get("b").unwrap().deleted);
    }

    #[test]
    fn test_job_in_exactly_one_tier() {
        let mut reg = registry();
        reg.ingest(vec![job("a", 0), job("b", 1)], 0);
        reg.promote_aged(5_000);
        reg.promote_aged(10_000);
        let total: usize = (0..reg.num_tiers()).map(|t| reg.tier_len(t)).sum();
        assert_eq!(total, reg.len());
        for t in 0..reg.num_tiers() {
            for j in reg.tier_jobs(t) {
                assert_eq!(reg.tier_of(&j.id), Some(t));
            }
        }
    }
}
