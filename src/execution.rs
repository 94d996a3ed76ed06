//! Interface to the data-flow execution engine.
//!
//! The engine runs a job's compiled task graph on the participating members.
//! The coordinator only deploys, terminates and snapshots executions; it
//! never looks inside the graph.

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::cluster::Member;
use crate::error::ExecutionError;
use crate::job::{ExecutionId, JobId};

/// Everything the engine needs to deploy one execution.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub job_id: JobId,
    pub execution_id: ExecutionId,
    pub graph: Vec<u8>,
    pub participants: Vec<Member>,
    /// Snapshot to restore state from, if any.
    pub restore_snapshot_id: Option<u64>,
}

/// Resolves when a deployed execution has ended on every participant.
pub type ExecutionCompletion = oneshot::Receiver<Result<(), ExecutionError>>;

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Initialize the execution on all participants.
    ///
    /// Returns once the execution is running; the returned completion
    /// resolves when it ends, successfully or not.
    async fn deploy(&self, plan: ExecutionPlan) -> Result<ExecutionCompletion, ExecutionError>;

    /// Request teardown of a running execution. Graceful teardown lets the
    /// execution checkpoint before unwinding.
    async fn terminate(
        &self,
        job_id: JobId,
        execution_id: ExecutionId,
        graceful: bool,
    ) -> Result<(), ExecutionError>;

    /// Write one checkpoint of a running execution.
    async fn snapshot(
        &self,
        job_id: JobId,
        execution_id: ExecutionId,
        snapshot_id: u64,
    ) -> Result<(), ExecutionError>;
}
