use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Notify};
use uuid::Uuid;

use crate::cluster::Member;
use crate::error::ExecutionError;
use crate::execution::{ExecutionCompletion, ExecutionEngine, ExecutionPlan};
use crate::job::{ExecutionId, JobId};

#[derive(Debug)]
struct RunningExecution {
    execution_id: ExecutionId,
    participants: Vec<Member>,
    restored_from: Option<u64>,
    done: oneshot::Sender<Result<(), ExecutionError>>,
}

#[derive(Debug, Default)]
struct EngineInner {
    running: HashMap<JobId, RunningExecution>,
    deploy_failures: VecDeque<ExecutionError>,
    terminate_failures: VecDeque<ExecutionError>,
    deploys: Vec<(JobId, ExecutionId)>,
    snapshot_requests: Vec<(JobId, ExecutionId)>,
    snapshots: Vec<(JobId, ExecutionId, u64)>,
    terminations: Vec<(JobId, ExecutionId, bool)>,
    /// Record termination requests without ending the execution.
    hold_terminations: bool,
    /// Snapshot requests wait until released.
    hold_snapshots: bool,
}

/// Execution engine that runs nothing.
///
/// Deployed executions stay running until a test (or the auto-complete
/// timer) ends them. Termination ends the execution as cancelled, the way
/// a real engine reports a torn-down job.
#[derive(Debug, Clone, Default)]
pub struct LocalEngine {
    inner: Arc<Mutex<EngineInner>>,
    snapshots_released: Arc<Notify>,
    auto_complete: Option<Duration>,
}

impl LocalEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete every execution successfully after `after`.
    pub fn with_auto_complete(mut self, after: Duration) -> Self {
        self.auto_complete = Some(after);
        self
    }

    fn inner(&self) -> MutexGuard<'_, EngineInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next deploy fail with `error`.
    pub fn fail_next_deploy(&self, error: ExecutionError) {
        self.inner().deploy_failures.push_back(error);
    }

    /// Make the next termination request fail with `error`. The execution
    /// keeps running.
    pub fn fail_next_terminate(&self, error: ExecutionError) {
        self.inner().terminate_failures.push_back(error);
    }

    /// While held, termination requests are recorded but executions keep
    /// running until ended by hand.
    pub fn hold_terminations(&self, held: bool) {
        self.inner().hold_terminations = held;
    }

    /// While held, snapshot requests block. Releasing lets every waiting
    /// request proceed.
    pub fn hold_snapshots(&self, held: bool) {
        self.inner().hold_snapshots = held;
        if !held {
            self.snapshots_released.notify_waiters();
        }
    }

    /// End the job's running execution successfully.
    pub fn complete_job(&self, job_id: JobId) -> bool {
        self.finish(job_id, Ok(()))
    }

    /// End the job's running execution with `error`.
    pub fn fail_job(&self, job_id: JobId, error: ExecutionError) -> bool {
        self.finish(job_id, Err(error))
    }

    fn finish(&self, job_id: JobId, result: Result<(), ExecutionError>) -> bool {
        let execution = self.inner().running.remove(&job_id);
        match execution {
            Some(execution) => execution.done.send(result).is_ok(),
            None => false,
        }
    }

    /// Fail every execution the member takes part in, as the engine does
    /// when a participant drops out.
    pub fn member_left(&self, uuid: Uuid) -> usize {
        let affected: Vec<RunningExecution> = {
            let mut inner = self.inner();
            let jobs: Vec<JobId> = inner
                .running
                .iter()
                .filter(|(_, e)| e.participants.iter().any(|m| m.uuid == uuid))
                .map(|(job_id, _)| *job_id)
                .collect();
            jobs.iter()
                .filter_map(|job_id| inner.running.remove(job_id))
                .collect()
        };
        let count = affected.len();
        for execution in affected {
            let _ = execution.done.send(Err(ExecutionError::MemberLeft(uuid)));
        }
        count
    }

    pub fn running_execution(&self, job_id: JobId) -> Option<ExecutionId> {
        self.inner().running.get(&job_id).map(|e| e.execution_id)
    }

    pub fn running_count(&self) -> usize {
        self.inner().running.len()
    }

    pub fn participants(&self, job_id: JobId) -> Vec<Member> {
        self.inner()
            .running
            .get(&job_id)
            .map(|e| e.participants.clone())
            .unwrap_or_default()
    }

    pub fn restored_snapshot(&self, job_id: JobId) -> Option<u64> {
        self.inner()
            .running
            .get(&job_id)
            .and_then(|e| e.restored_from)
    }

    pub fn deploy_count(&self, job_id: JobId) -> usize {
        self.inner()
            .deploys
            .iter()
            .filter(|(id, _)| *id == job_id)
            .count()
    }

    pub fn deployed_execution_ids(&self, job_id: JobId) -> Vec<ExecutionId> {
        self.inner()
            .deploys
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, execution_id)| *execution_id)
            .collect()
    }

    pub fn snapshot_ids(&self, job_id: JobId) -> Vec<u64> {
        self.inner()
            .snapshots
            .iter()
            .filter(|(id, _, _)| *id == job_id)
            .map(|(_, _, snapshot_id)| *snapshot_id)
            .collect()
    }

    /// Executions that snapshot requests were received for, including
    /// requests still waiting or rejected as stale.
    pub fn snapshot_requests(&self, job_id: JobId) -> Vec<ExecutionId> {
        self.inner()
            .snapshot_requests
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, execution_id)| *execution_id)
            .collect()
    }

    /// Snapshots written by one execution of the job.
    pub fn snapshots_of(&self, job_id: JobId, execution_id: ExecutionId) -> Vec<u64> {
        self.inner()
            .snapshots
            .iter()
            .filter(|(id, execution, _)| *id == job_id && *execution == execution_id)
            .map(|(_, _, snapshot_id)| *snapshot_id)
            .collect()
    }

    /// Graceful flags of the termination requests received for the job.
    pub fn terminations(&self, job_id: JobId) -> Vec<bool> {
        self.inner()
            .terminations
            .iter()
            .filter(|(id, _, _)| *id == job_id)
            .map(|(_, _, graceful)| *graceful)
            .collect()
    }
}

#[async_trait]
impl ExecutionEngine for LocalEngine {
    async fn deploy(&self, plan: ExecutionPlan) -> Result<ExecutionCompletion, ExecutionError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner();
            inner.deploys.push((plan.job_id, plan.execution_id));
            if let Some(error) = inner.deploy_failures.pop_front() {
                return Err(error);
            }
            inner.running.insert(
                plan.job_id,
                RunningExecution {
                    execution_id: plan.execution_id,
                    participants: plan.participants,
                    restored_from: plan.restore_snapshot_id,
                    done: tx,
                },
            );
        }
        tracing::debug!(job_id = %plan.job_id, execution_id = %plan.execution_id, "Execution deployed");

        if let Some(after) = self.auto_complete {
            let engine = self.clone();
            let (job_id, execution_id) = (plan.job_id, plan.execution_id);
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                if engine.running_execution(job_id) == Some(execution_id) {
                    engine.complete_job(job_id);
                }
            });
        }
        Ok(rx)
    }

    async fn terminate(
        &self,
        job_id: JobId,
        execution_id: ExecutionId,
        graceful: bool,
    ) -> Result<(), ExecutionError> {
        let execution = {
            let mut inner = self.inner();
            inner.terminations.push((job_id, execution_id, graceful));
            if let Some(error) = inner.terminate_failures.pop_front() {
                return Err(error);
            }
            if inner.hold_terminations {
                return Ok(());
            }
            match inner.running.get(&job_id) {
                Some(e) if e.execution_id == execution_id => inner.running.remove(&job_id),
                _ => None,
            }
        };
        // an execution that already ended needs no teardown
        if let Some(execution) = execution {
            let _ = execution.done.send(Err(ExecutionError::Cancelled));
        }
        Ok(())
    }

    async fn snapshot(
        &self,
        job_id: JobId,
        execution_id: ExecutionId,
        snapshot_id: u64,
    ) -> Result<(), ExecutionError> {
        self.inner().snapshot_requests.push((job_id, execution_id));
        loop {
            let released = self.snapshots_released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if !self.inner().hold_snapshots {
                break;
            }
            released.await;
        }

        let mut inner = self.inner();
        match inner.running.get(&job_id) {
            Some(e) if e.execution_id == execution_id => {
                inner.snapshots.push((job_id, execution_id, snapshot_id));
                Ok(())
            }
            _ => Err(ExecutionError::Failed(format!(
                "execution {execution_id} of job {job_id} is not running"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(job: u64, execution: u64, participants: Vec<Member>) -> ExecutionPlan {
        ExecutionPlan {
            job_id: JobId::new(job),
            execution_id: ExecutionId::new(execution),
            graph: vec![],
            participants,
            restore_snapshot_id: None,
        }
    }

    #[tokio::test]
    async fn completion_is_delivered() {
        let engine = LocalEngine::new();
        let rx = engine.deploy(plan(1, 1, vec![])).await.unwrap();
        assert!(engine.complete_job(JobId::new(1)));
        assert_eq!(rx.await.unwrap(), Ok(()));
        assert!(!engine.complete_job(JobId::new(1)));
    }

    #[tokio::test]
    async fn terminate_cancels_matching_execution_only() {
        let engine = LocalEngine::new();
        let rx = engine.deploy(plan(1, 4, vec![])).await.unwrap();
        engine
            .terminate(JobId::new(1), ExecutionId::new(3), true)
            .await
            .unwrap();
        assert_eq!(engine.running_execution(JobId::new(1)), Some(ExecutionId::new(4)));
        engine
            .terminate(JobId::new(1), ExecutionId::new(4), false)
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), Err(ExecutionError::Cancelled));
        assert_eq!(engine.terminations(JobId::new(1)), vec![true, false]);
    }

    #[tokio::test]
    async fn member_left_fails_only_affected_executions() {
        let engine = LocalEngine::new();
        let a = Member::data("a");
        let b = Member::data("b");
        let rx1 = engine.deploy(plan(1, 1, vec![a.clone(), b.clone()])).await.unwrap();
        let _rx2 = engine.deploy(plan(2, 2, vec![a.clone()])).await.unwrap();

        assert_eq!(engine.member_left(b.uuid), 1);
        assert_eq!(rx1.await.unwrap(), Err(ExecutionError::MemberLeft(b.uuid)));
        assert_eq!(engine.running_count(), 1);
    }

    #[tokio::test]
    async fn queued_deploy_failure_is_returned_once() {
        let engine = LocalEngine::new();
        engine.fail_next_deploy(ExecutionError::TopologyChanged);
        assert!(engine.deploy(plan(1, 1, vec![])).await.is_err());
        assert!(engine.deploy(plan(1, 2, vec![])).await.is_ok());
        assert_eq!(engine.deploy_count(JobId::new(1)), 2);
    }

    #[tokio::test]
    async fn queued_terminate_failure_keeps_execution_running() {
        let engine = LocalEngine::new();
        let _rx = engine.deploy(plan(1, 1, vec![])).await.unwrap();
        engine.fail_next_terminate(ExecutionError::TopologyChanged);
        assert_eq!(
            engine.terminate(JobId::new(1), ExecutionId::new(1), true).await,
            Err(ExecutionError::TopologyChanged)
        );
        assert_eq!(engine.running_execution(JobId::new(1)), Some(ExecutionId::new(1)));
        engine
            .terminate(JobId::new(1), ExecutionId::new(1), true)
            .await
            .unwrap();
        assert!(engine.running_execution(JobId::new(1)).is_none());
    }

    #[tokio::test]
    async fn held_snapshot_waits_for_release() {
        let engine = LocalEngine::new();
        let _rx = engine.deploy(plan(1, 1, vec![])).await.unwrap();
        engine.hold_snapshots(true);

        let waiting = engine.clone();
        let handle = tokio::spawn(async move {
            waiting.snapshot(JobId::new(1), ExecutionId::new(1), 7).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.snapshot_requests(JobId::new(1)), vec![ExecutionId::new(1)]);
        assert!(engine.snapshot_ids(JobId::new(1)).is_empty());

        engine.hold_snapshots(false);
        handle.await.unwrap().unwrap();
        assert_eq!(engine.snapshots_of(JobId::new(1), ExecutionId::new(1)), vec![7]);
    }
}
