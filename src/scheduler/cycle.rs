//! Dispatch cycle runner.
//!
//! # Algorithm
//!
//! One cycle, in order:
//!
//! 1. Pull node metrics and mark nodes with stale heartbeats.
//! 2. Pull pending jobs into the registry.
//! 3. Promote aged jobs, then take a bounded batch.
//! 4. Rank the batch.
//! 5. Publish a fresh desirability view under the current cluster pressure.
//! 6. Assign; skipped and deferred jobs go back to pending.
//! 7. Acknowledge the assigned jobs and flush staged write-backs.
//!
//! Collaborator failures are logged and counted. They never abort a cycle,
//! and staged patches survive until a later flush succeeds.

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::collaborators::{JobStore, MetricsSource};
use super::report::CycleReport;
use crate::affinity::{AffinityEngine, AffinityObservation};
use crate::config::EngineConfig;
use crate::dispatching::Dispatcher;
use crate::error::{Error, Result};
use crate::health::{cluster_pressure, MetricKey, NodeDesirabilityEngine, NodeMetricStore};
use crate::models::{Job, JobOutcome, JobPatch, JobStatus, Stage};
use crate::ranking::{JobRanker, SharedStatsSource, StageCostEstimator, StageObservation};
use crate::registry::JobRegistry;

/// Cycle runner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Identity used when claiming and acknowledging jobs.
    pub coordinator_id: String,
    /// Most jobs requested from the store per cycle.
    pub fetch_limit: usize,
    /// Most jobs ranked and assigned per cycle.
    pub batch_size: usize,
    /// Exploration seed. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            coordinator_id: "coordinator-1".to_string(),
            fetch_limit: 100,
            batch_size: 50,
            seed: None,
        }
    }
}

/// Single owning worker for every scheduling structure.
pub struct Coordinator {
    config: CycleConfig,
    store: Arc<dyn JobStore>,
    metrics: Arc<dyn MetricsSource>,
    registry: JobRegistry,
    ranker: JobRanker,
    affinity: AffinityEngine,
    metric_store: NodeMetricStore,
    desirability: NodeDesirabilityEngine,
    dispatcher: Dispatcher,
    rng: SmallRng,
    cycles: u64,
}

impl Coordinator {
    /// Validates the configuration and builds every component from it.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn JobStore>,
        metrics: Arc<dyn MetricsSource>,
    ) -> Result<Self> {
        config.validate()?;
        let rng = match config.cycle.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        Ok(Self {
            registry: JobRegistry::new(config.registry),
            ranker: JobRanker::new(config.ranker)
                .with_stage_costs(StageCostEstimator::new(config.stage_cost)),
            affinity: AffinityEngine::new(config.affinity),
            metric_store: NodeMetricStore::new(config.metric_store),
            desirability: NodeDesirabilityEngine::new(config.desirability),
            dispatcher: Dispatcher::new(config.dispatcher),
            config: config.cycle,
            store,
            metrics,
            rng,
            cycles: 0,
        })
    }

    /// Sets the per-type stats source used by the ranker.
    pub fn with_stats_source(mut self, source: SharedStatsSource) -> Self {
        self.ranker = self.ranker.with_stats_source(source);
        self
    }

    /// Runs one cycle at the current wall-clock time.
    pub async fn run_cycle_now(&mut self) -> CycleReport {
        self.run_cycle(chrono::Utc::now().timestamp_millis()).await
    }

    /// Runs one cycle at `now_ms`.
    pub async fn run_cycle(&mut self, now_ms: i64) -> CycleReport {
        self.cycles += 1;
        let mut report = CycleReport::new(self.cycles, now_ms);

        match self.metrics.get_coordinator_metrics().await {
            Ok(rows) => {
                self.metric_store.ingest(rows);
            }
            Err(e) => {
                warn!(error = %e, "Coordinator::run_cycle: metrics fetch failed");
                report.store_errors += 1;
            }
        }
        self.metric_store.mark_stale(now_ms);

        match self
            .store
            .fetch_pending_jobs(&self.config.coordinator_id, self.config.fetch_limit)
            .await
        {
            Ok(jobs) => report.fetched = self.registry.ingest(jobs, now_ms),
            Err(e) => {
                warn!(error = %e, "Coordinator::run_cycle: job fetch failed");
                report.store_errors += 1;
            }
        }

        report.promoted = self.registry.promote_aged(now_ms).len();
        let batch = self.registry.dispatch_batch(self.config.batch_size);
        report.batched = batch.len();
        let ranked = self.ranker.score_jobs(batch, now_ms);

        // Dead nodes take no work, so they do not count toward pressure.
        let pressure = cluster_pressure(
            self.metric_store.iter().filter(|m| m.alive),
            self.desirability.config().max_wait_sec,
        );
        let view = self.desirability.run_tick(&self.metric_store, pressure);
        report.node_states = view.state_counts();

        let tick = self.dispatcher.run_assignment_tick_under_pressure(
            &ranked,
            &view,
            &self.affinity,
            pressure,
            now_ms,
            &mut self.rng,
        );

        for assignment in &tick.assignments {
            let Some(job) = ranked.iter().find(|j| j.id == assignment.job_id) else {
                continue;
            };
            self.registry.update(
                &assignment.job_id,
                JobPatch {
                    status: Some(JobStatus::Assigned),
                    assigned_node: Some(assignment.node_id.clone()),
                    calculated_score: job.calculated_score,
                    estimated_ram_mb: job.estimated_ram_mb,
                    ..Default::default()
                },
            );
        }
        self.registry.requeue(
            tick.skipped
                .iter()
                .chain(tick.deferred.iter())
                .map(String::as_str),
        );

        let assigned_ids: Vec<String> = tick.assignments.iter().map(|a| a.job_id.clone()).collect();
        report.absorb_tick(tick);

        if !assigned_ids.is_empty() {
            match self
                .store
                .acknowledge_jobs(&assigned_ids, &self.config.coordinator_id)
                .await
            {
                Ok(()) => {
                    for job_id in &assigned_ids {
                        self.registry
                            .update(job_id, JobPatch::status(JobStatus::Acknowledged));
                    }
                    report.acknowledged = assigned_ids.len();
                }
                Err(e) => {
                    // Unacknowledged work goes back to pending for the next cycle.
                    let released = self
                        .registry
                        .requeue(assigned_ids.iter().map(String::as_str));
                    warn!(error = %e, count = assigned_ids.len(), released, "Coordinator::run_cycle: acknowledge failed");
                    report.store_errors += 1;
                    report.released = released;
                }
            }
        }

        match self.flush().await {
            Ok(flushed) => report.flushed = flushed,
            Err(_) => report.store_errors += 1,
        }
        report.pending_writes = self.registry.write_back().len();

        info!(
            cycle = report.cycle,
            fetched = report.fetched,
            batched = report.batched,
            assigned = report.assignments.len(),
            skipped = report.skipped.len(),
            deferred = report.deferred.len(),
            halted = report.halted,
            pressure = report.cluster_pressure,
            pending_writes = report.pending_writes,
            "dispatch cycle complete"
        );
        report
    }

    /// Feeds a finished job back into the learners, then removes it and
    /// flushes its deletion.
    ///
    /// Returns how many staged patches the flush persisted. Fails with
    /// [`Error::UnknownJob`] when the job is not registered. A failed flush
    /// is not an error; it persists nothing and the deletion stays staged.
    pub async fn record_outcome(&mut self, outcome: &JobOutcome) -> Result<usize> {
        let Some(job) = self.registry.get(&outcome.job_id).cloned() else {
            return Err(Error::UnknownJob(outcome.job_id.clone()));
        };

        self.affinity.observe(
            &outcome.node_id,
            &AffinityObservation {
                pipeline: outcome.pipeline.clone(),
                size_bytes: outcome.size_bytes,
                execution_time_sec: outcome.execution_time_sec,
                success: outcome.success,
                timestamp_ms: outcome.finished_at_ms,
            },
        );

        if let Some(peak) = outcome.peak_ram_bytes {
            self.observe_stages(&job, outcome, peak);
        }

        let counter = if outcome.success {
            MetricKey::SuccessCount
        } else {
            MetricKey::ErrorCount
        };
        self.metric_store.update(
            &outcome.node_id,
            &[
                (counter, 1.0),
                (MetricKey::AvgJobTime, outcome.execution_time_sec),
            ],
            outcome.finished_at_ms,
        );

        self.registry.remove([outcome.job_id.as_str()]);
        debug!(job_id = %outcome.job_id, node_id = %outcome.node_id, success = outcome.success, "Coordinator::record_outcome: recorded");

        match self.flush().await {
            Ok(flushed) => Ok(flushed),
            Err(e) => {
                debug!(job_id = %outcome.job_id, retryable = e.is_retryable(), "Coordinator::record_outcome: deletion left staged");
                Ok(0)
            }
        }
    }

    /// Splits the job's run time across its stages by their cost weights
    /// and records one stage observation each.
    fn observe_stages(&mut self, job: &Job, outcome: &JobOutcome, peak_ram_bytes: u64) {
        let stages: Vec<Stage> = if job.stages.is_empty() {
            outcome.stage_extensions.iter().map(Stage::new).collect()
        } else {
            job.stages.clone()
        };
        if stages.is_empty() {
            return;
        }
        let profile = Job {
            stages,
            ..job.clone()
        };
        let weights = self.ranker.stage_weights(&profile);
        for (stage, weight) in profile.stages.iter().zip(&weights.weights) {
            self.ranker.stage_costs_mut().observe(&StageObservation {
                pipeline: outcome.pipeline.clone(),
                extension: stage.extension.clone(),
                peak_ram_bytes,
                file_size_bytes: stage.size_bytes.unwrap_or(outcome.size_bytes),
                execution_time_sec: outcome.execution_time_sec * weight,
                timestamp_ms: outcome.finished_at_ms,
            });
        }
    }

    /// Sends every staged patch to the store and clears what it persisted.
    async fn flush(&mut self) -> Result<usize> {
        let patches = self.registry.staged_writes();
        if patches.is_empty() {
            return Ok(0);
        }
        match self.store.write_back(&patches).await {
            Ok(written) => {
                let cleared = self
                    .registry
                    .acknowledge_writes(written.iter().map(String::as_str));
                debug!(cleared, staged = patches.len(), "Coordinator::flush: write-back done");
                Ok(cleared)
            }
            Err(e) => {
                warn!(error = %e, staged = patches.len(), retryable = e.is_retryable(), "Coordinator::flush: write-back failed");
                Err(e)
            }
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn ranker(&self) -> &JobRanker {
        &self.ranker
    }

    pub fn affinity(&self) -> &AffinityEngine {
        &self.affinity
    }

    pub fn metric_store(&self) -> &NodeMetricStore {
        &self.metric_store
    }

    pub fn metric_store_mut(&mut self) -> &mut NodeMetricStore {
        &mut self.metric_store
    }

    pub fn desirability(&self) -> &NodeDesirabilityEngine {
        &self.desirability
    }

    pub fn desirability_mut(&mut self) -> &mut NodeDesirabilityEngine {
        &mut self.desirability
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("registry", &self.registry.len())
            .field("nodes", &self.metric_store.len())
            .field("affinity_records", &self.affinity.len())
            .field("cycles", &self.cycles)
            .finish()
    }
}
