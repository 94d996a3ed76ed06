use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::JobConfig;
use crate::error::ExecutionError;
use crate::job::{ExecutionId, JobId, JobStatus};

/// Immutable submission record. Persisted before coordination starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub creation_time: DateTime<Utc>,
    /// Compiled task graph, forwarded to the execution engine untouched.
    pub graph: Vec<u8>,
    pub config: JobConfig,
}

impl JobRecord {
    pub fn new(job_id: JobId, graph: Vec<u8>, config: JobConfig) -> Self {
        Self {
            job_id,
            creation_time: Utc::now(),
            graph,
            config,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.config.name.as_deref()
    }

    pub fn name_or_id(&self) -> String {
        self.config
            .name
            .clone()
            .unwrap_or_else(|| self.job_id.to_string())
    }
}

/// Mutable per-job state that survives executions and coordinator failover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExecutionRecord {
    pub job_id: JobId,
    /// Id of the latest execution, `None` before the first start.
    pub execution_id: Option<ExecutionId>,
    /// Minimum data-member count for split-brain protected jobs, 0 otherwise.
    pub quorum_size: usize,
    pub suspended: bool,
    /// Id of the last successfully written snapshot.
    pub snapshot_id: Option<u64>,
}

impl JobExecutionRecord {
    pub fn new(job_id: JobId, quorum_size: usize, suspended: bool) -> Self {
        Self {
            job_id,
            execution_id: None,
            quorum_size,
            suspended,
            snapshot_id: None,
        }
    }
}

/// Terminal outcome of a job. Written exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub job_name: String,
    /// Uuid of the coordinator that completed the job.
    pub coordinator: Uuid,
    pub creation_time: DateTime<Utc>,
    pub completion_time: DateTime<Utc>,
    pub failure: Option<ExecutionError>,
}

impl JobResult {
    pub fn status(&self) -> JobStatus {
        if self.failure.is_none() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn failure_text(&self) -> Option<String> {
        self.failure.as_ref().map(|e| e.to_string())
    }
}

/// Read-only projection merging the live context with persisted records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub execution_id: Option<ExecutionId>,
    pub name: String,
    pub status: JobStatus,
    pub submission_time: DateTime<Utc>,
    pub completion_time: Option<DateTime<Utc>>,
    pub failure_text: Option<String>,
}

impl JobSummary {
    pub fn from_result(result: &JobResult) -> Self {
        Self {
            job_id: result.job_id,
            execution_id: None,
            name: result.job_name.clone(),
            status: result.status(),
            submission_time: result.creation_time,
            completion_time: Some(result.completion_time),
            failure_text: result.failure_text(),
        }
    }
}
