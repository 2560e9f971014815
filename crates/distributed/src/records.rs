//! Persisted job bookkeeping records.
//!
//! Per-job lifecycle: `SUBMITTED -> RUNNING (one or more execution attempts)
//! -> {COMPLETED | FAILED}`. A [`JobRecord`] exists from submission through
//! the job's entire running lifetime; a [`JobResult`] is created exactly once
//! on the first terminal transition and its presence is the authoritative
//! "this job is done" signal consumed by the cleanup protocol.

use serde::{Deserialize, Serialize};
use weir_common::{JobConfig, JobId};

/// Persisted job submission. Immutable once inserted; removed only by cleanup
/// after the job's result is durably recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    /// Submission wall-clock timestamp, unix ms.
    pub creation_time: i64,
    /// Serialized dataflow graph, opaque to the repository. Encoding is owned
    /// by the external serialization layer.
    pub dag: Vec<u8>,
    pub job_name: String,
    pub config: JobConfig,
}

impl JobRecord {
    /// Builds a record, deriving the job name from the config or falling back
    /// to the job id.
    pub fn new(job_id: JobId, creation_time: i64, dag: Vec<u8>, config: JobConfig) -> Self {
        let job_name = config
            .name
            .clone()
            .unwrap_or_else(|| job_id.to_string());
        Self {
            job_id,
            creation_time,
            dag,
            job_name,
            config,
        }
    }
}

/// Persisted terminal outcome of a job. Created exactly once; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub config: JobConfig,
    /// Identity of the member that coordinated the terminal transition.
    pub coordinator: String,
    /// Submission timestamp copied from the job record, unix ms.
    pub creation_time: i64,
    /// Terminal-transition timestamp, unix ms.
    pub completion_time: i64,
    /// Failure cause; `None` for successful completion.
    pub failure: Option<String>,
}

impl JobResult {
    pub fn status(&self) -> JobStatus {
        if self.failure.is_none() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        }
    }

    pub fn is_successful(&self) -> bool {
        self.failure.is_none()
    }
}

/// Terminal status derived from a [`JobResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Completed,
    Failed,
}

/// Value stored in a per-job resources map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResourceValue {
    /// Uploaded resource payload.
    Blob(Vec<u8>),
    /// Last-access timestamp, unix ms; stored under [`RESOURCE_MARKER`].
    Marker(i64),
}

/// Reserved key of the last-access marker entry in every resources map.
pub const RESOURCE_MARKER: &str = "__weir.resources.marker";
