use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::job::JobId;

/// Failure reported by a cluster member or the execution engine.
///
/// Member-departure and topology errors are retryable: the coordinator
/// reschedules the start after a delay. Everything else is fatal and
/// finalizes the job as failed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionError {
    #[error("Member {0} left the cluster")]
    MemberLeft(Uuid),

    #[error("Target {0} is not a member of the cluster")]
    TargetNotMember(Uuid),

    #[error("Cluster topology changed")]
    TopologyChanged,

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Request timed out")]
    Timeout,

    #[error("Execution failed: {0}")]
    Failed(String),
}

impl ExecutionError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutionError::MemberLeft(_)
                | ExecutionError::TargetNotMember(_)
                | ExecutionError::TopologyChanged
        )
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, ExecutionError::Cancelled)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordError {
    #[error("Not the master, current master is {0:?}")]
    NotMaster(Option<Uuid>),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Another active job with equal name ({name}) exists: {job_id}")]
    JobAlreadyExists { name: String, job_id: JobId },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Cluster is entering passive state, retry later")]
    EnteringPassiveState,

    #[error("Retryable: {0}")]
    Retryable(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoordError::EnteringPassiveState | CoordError::Retryable(_) => true,
            CoordError::Execution(e) => e.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordError>;
