//! Job model.
//!
//! A job is one file-processing request: a file of `size_bytes` run through a
//! pipeline, optionally split into stages (one per transformation). Jobs are
//! owned by the [`JobRegistry`](crate::registry::JobRegistry) from ingestion
//! until deletion; the ranker and dispatcher work on batch copies and write
//! their results back through [`JobPatch`].
//!
//! # Time Representation
//! All timestamps are Unix epoch milliseconds.

use serde::{Deserialize, Serialize};

/// Bytes per megabyte (binary).
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Lifecycle status of a job inside the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Claimed from the store, waiting for a dispatch batch.
    #[default]
    Pending,
    /// Handed to the ranker/dispatcher in the current cycle.
    Queued,
    /// Assigned to a node by the dispatcher.
    Assigned,
    /// Assignment confirmed by the persistent store.
    Acknowledged,
}

/// One stage (transformation) of a multi-stage job.
///
/// Missing fields inherit from the owning job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Input file extension for this stage (e.g. `"mp4"`, `".CSV"`).
    pub extension: String,
    /// Input size in bytes. `None` = the job's size.
    pub size_bytes: Option<u64>,
    /// Whether the stage streams its input. `None` = the job's flag.
    pub supports_streaming: Option<bool>,
    /// Explicit RAM requirement in MB, if the pipeline declares one.
    pub ram_mb: Option<f64>,
}

impl Stage {
    /// Creates a stage for the given extension.
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            ..Default::default()
        }
    }

    /// Sets the stage input size.
    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = Some(size_bytes);
        self
    }

    /// Sets the streaming flag.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.supports_streaming = Some(streaming);
        self
    }

    /// Sets the explicit RAM requirement.
    pub fn with_ram_mb(mut self, ram_mb: f64) -> Self {
        self.ram_mb = Some(ram_mb);
        self
    }
}

/// A file-processing job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: String,
    /// Scheduling priority (higher = more urgent).
    pub priority: i32,
    /// Creation time (epoch ms).
    pub created_at_ms: i64,
    /// Time the job entered its current registry tier (epoch ms).
    pub arrival_ms: Option<i64>,
    /// Input file size in bytes.
    pub size_bytes: u64,
    /// Job type tag (used for historical weights).
    pub job_type: String,
    /// Processing pipeline identifier.
    pub pipeline: String,
    /// Whether the whole job streams its input.
    pub supports_streaming: bool,
    /// Ordered stages. Empty = single-stage job.
    pub stages: Vec<Stage>,
    /// Blend stage weights with a softmax instead of a plain sum.
    pub softmax_stage_weights: bool,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Score written by the ranker in the current cycle.
    pub calculated_score: Option<f64>,
    /// Peak memory estimate written by the ranker (MB).
    pub estimated_ram_mb: Option<f64>,
    /// Node the job was assigned to, once assigned.
    pub assigned_node: Option<String>,
    /// Source file path, as returned by the store.
    pub file_path: Option<String>,
    /// Attempts already made by the store's retry policy.
    pub retry_count: u32,
    /// Maximum attempts allowed by the store's retry policy.
    pub max_retries: u32,
}

impl Job {
    /// Creates a pending job with the given ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            priority: 0,
            created_at_ms: 0,
            arrival_ms: None,
            size_bytes: 0,
            job_type: String::new(),
            pipeline: String::new(),
            supports_streaming: false,
            stages: Vec::new(),
            softmax_stage_weights: false,
            status: JobStatus::Pending,
            calculated_score: None,
            estimated_ram_mb: None,
            assigned_node: None,
            file_path: None,
            retry_count: 0,
            max_retries: 0,
        }
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the creation time.
    pub fn with_created_at(mut self, created_at_ms: i64) -> Self {
        self.created_at_ms = created_at_ms;
        self
    }

    /// Sets the input size.
    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    /// Sets the job type tag.
    pub fn with_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = job_type.into();
        self
    }

    /// Sets the pipeline.
    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = pipeline.into();
        self
    }

    /// Sets the job-level streaming flag.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.supports_streaming = streaming;
        self
    }

    /// Appends a stage.
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Requests softmax stage blending.
    pub fn with_softmax_stage_weights(mut self) -> Self {
        self.softmax_stage_weights = true;
        self
    }

    /// Sets the source file path.
    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Input size in megabytes.
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / BYTES_PER_MB
    }

    /// Number of stages.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Applies a patch in place. Fields absent from the patch are untouched.
    pub fn apply(&mut self, patch: &JobPatch) {
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(score) = patch.calculated_score {
            self.calculated_score = Some(score);
        }
        if let Some(ram) = patch.estimated_ram_mb {
            self.estimated_ram_mb = Some(ram);
        }
        if let Some(node) = &patch.assigned_node {
            self.assigned_node = Some(node.clone());
        }
        if let Some(arrival) = patch.arrival_ms {
            self.arrival_ms = Some(arrival);
        }
        if let Some(retries) = patch.retry_count {
            self.retry_count = retries;
        }
    }
}

/// A partial update to a job, also used as the write-back record for the
/// persistent store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPatch {
    pub priority: Option<i32>,
    pub status: Option<JobStatus>,
    pub calculated_score: Option<f64>,
    pub estimated_ram_mb: Option<f64>,
    pub assigned_node: Option<String>,
    pub arrival_ms: Option<i64>,
    /// Attempts the store has recorded for the job.
    pub retry_count: Option<u32>,
    /// Marks the job as deleted from the coordinator.
    pub deleted: bool,
}

impl JobPatch {
    /// A patch that only sets the status.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// A patch that only sets the priority.
    pub fn priority(priority: i32) -> Self {
        Self {
            priority: Some(priority),
            ..Default::default()
        }
    }

    /// A deletion marker.
    pub fn deletion() -> Self {
        Self {
            deleted: true,
            ..Default::default()
        }
    }

    /// Merges `later` on top of this patch; fields set in `later` win.
    pub fn merge(&mut self, later: &JobPatch) {
        if later.priority.is_some() {
            self.priority = later.priority;
        }
        if later.status.is_some() {
            self.status = later.status;
        }
        if later.calculated_score.is_some() {
            self.calculated_score = later.calculated_score;
        }
        if later.estimated_ram_mb.is_some() {
            self.estimated_ram_mb = later.estimated_ram_mb;
        }
        if later.assigned_node.is_some() {
            self.assigned_node = later.assigned_node.clone();
        }
        if later.arrival_ms.is_some() {
            self.arrival_ms = later.arrival_ms;
        }
        if later.retry_count.is_some() {
            self.retry_count = later.retry_count;
        }
        self.deleted |= later.deleted;
    }
}

/// Outcome of a finished job, reported by the node that ran it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub node_id: String,
    pub pipeline: String,
    pub size_bytes: u64,
    /// Wall-clock execution time in seconds.
    pub execution_time_sec: f64,
    pub success: bool,
    /// Peak resident memory observed during the run.
    pub peak_ram_bytes: Option<u64>,
    /// Extensions of the stages that ran, in order.
    pub stage_extensions: Vec<String>,
    /// Completion time (epoch ms).
    pub finished_at_ms: i64,
}
