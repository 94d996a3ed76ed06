//! Per-job coordination state on the master.
//!
//! A [`MasterContext`] exists for every job the coordinator is currently
//! responsible for. It drives the job through its lifecycle:
//!
//! ```text
//! NOT_RUNNING -> STARTING -> RUNNING -> COMPLETING -> COMPLETED | FAILED
//!                               ^  |
//!                     resume    |  v   suspend
//!                             SUSPENDED
//! ```
//!
//! Lifecycle methods take an [`InQueue`] marker: they are only ever called
//! from the coordinator queue. Timer callbacks (restart, snapshot) re-enter
//! through the queue as well, and fields they share with queued actions sit
//! behind the context's own mutex.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::oneshot;

use crate::cluster::Member;
use crate::config::JobConfig;
use crate::coordinator::queue::{BoxFuture, InQueue};
use crate::coordinator::JobCoordinationService;
use crate::error::{CoordError, ExecutionError, Result};
use crate::execution::{ExecutionCompletion, ExecutionPlan};
use crate::job::{
    CompletionSignal, ExecutionId, JobCompletion, JobExecutionRecord, JobId, JobOutcome,
    JobRecord, JobResult, JobStatus, ProcessingGuarantee, TerminationAction, TerminationMode,
};

#[derive(Debug)]
struct ContextState {
    status: JobStatus,
    execution_record: JobExecutionRecord,
    execution_id: Option<ExecutionId>,
    requested_termination: Option<TerminationMode>,
    participants: Vec<Member>,
    /// Consecutive retryable deploy failures since the last successful start.
    deploy_failures: u32,
    /// Execution whose snapshot is in flight. A stale one does not block
    /// snapshots of the current execution.
    snapshot_in_progress: Option<ExecutionId>,
    /// Notified when the current execution ends.
    execution_waiters: Vec<oneshot::Sender<()>>,
}

/// How a termination request is carried out.
enum Teardown {
    /// Forward the request to the running execution.
    Engine(ExecutionId),
    /// Deployment is still in flight; applied once it finishes.
    Deferred,
    /// Nothing is running, the job can be finalized right away.
    FinalizeNow,
    /// An equivalent request is already pending.
    AlreadyRequested,
}

#[derive(Debug)]
pub struct MasterContext {
    job_id: JobId,
    record: JobRecord,
    state: Mutex<ContextState>,
    completion: CompletionSignal,
}

impl MasterContext {
    pub fn new(record: JobRecord, execution_record: JobExecutionRecord) -> Self {
        let status = if execution_record.suspended {
            JobStatus::Suspended
        } else {
            JobStatus::NotRunning
        };
        Self {
            job_id: record.job_id,
            record,
            state: Mutex::new(ContextState {
                status,
                execution_record,
                execution_id: None,
                requested_termination: None,
                participants: Vec::new(),
                deploy_failures: 0,
                snapshot_in_progress: None,
                execution_waiters: Vec::new(),
            }),
            completion: CompletionSignal::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, ContextState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    pub fn config(&self) -> &JobConfig {
        &self.record.config
    }

    pub fn name(&self) -> Option<&str> {
        self.record.name()
    }

    pub fn status(&self) -> JobStatus {
        self.state().status
    }

    pub fn execution_id(&self) -> Option<ExecutionId> {
        self.state().execution_id
    }

    pub fn requested_termination(&self) -> Option<TerminationMode> {
        self.state().requested_termination
    }

    pub fn quorum_size(&self) -> usize {
        self.state().execution_record.quorum_size
    }

    pub fn is_suspended(&self) -> bool {
        self.state().execution_record.suspended
    }

    pub fn execution_record(&self) -> JobExecutionRecord {
        self.state().execution_record.clone()
    }

    pub fn participants(&self) -> Vec<Member> {
        self.state().participants.clone()
    }

    pub fn completion(&self) -> JobCompletion {
        self.completion.subscribe()
    }

    /// Resolve waiters without going through finalization. Used when a
    /// result already exists or the coordinator gives up the job.
    pub(crate) fn set_final_result(&self, outcome: JobOutcome) {
        let waiters = {
            let mut state = self.state();
            state.status = if outcome.is_ok() {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            };
            std::mem::take(&mut state.execution_waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(());
        }
        self.completion.complete(outcome);
    }

    pub(crate) fn set_final_result_from(&self, result: &JobResult) {
        self.set_final_result(match &result.failure {
            None => Ok(()),
            Some(e) => Err(e.clone()),
        });
    }

    /// Start a new execution unless a termination is pending or the job is
    /// suspended.
    pub(crate) async fn try_start_job(
        self: &Arc<Self>,
        svc: &JobCoordinationService,
        marker: InQueue,
    ) {
        let pending_cancel = {
            let state = self.state();
            if state.status.is_terminal() || state.status == JobStatus::Completing {
                return;
            }
            match state.requested_termination {
                Some(mode) if mode.is_cancel() => true,
                Some(mode) => {
                    tracing::debug!(job_id = %self.job_id, mode = %mode, "Not starting job, termination pending");
                    return;
                }
                None => false,
            }
        };
        if pending_cancel {
            self.finalize_job(svc, marker, Some(ExecutionError::Cancelled))
                .await;
            return;
        }

        {
            let state = self.state();
            if state.status == JobStatus::Suspended || state.execution_record.suspended {
                tracing::debug!(job_id = %self.job_id, "Not starting suspended job");
                return;
            }
            if matches!(state.status, JobStatus::Starting | JobStatus::Running) {
                tracing::debug!(job_id = %self.job_id, status = %state.status, "Job already started");
                return;
            }
        }

        if self.config().split_brain_protection {
            let quorum = self.quorum_size();
            if !svc.is_quorum_present(quorum) {
                tracing::info!(
                    job_id = %self.job_id,
                    quorum,
                    data_members = svc.data_member_count(),
                    "Rescheduling job restart since quorum is absent"
                );
                svc.schedule_restart(self.job_id);
                return;
            }
        }

        if !svc.should_start_jobs().await {
            tracing::debug!(job_id = %self.job_id, "Cluster not ready, rescheduling job start");
            svc.schedule_restart(self.job_id);
            return;
        }

        let participants = svc.execution_participants();
        if participants.is_empty() {
            tracing::warn!(job_id = %self.job_id, "No data members to run job, rescheduling");
            svc.schedule_restart(self.job_id);
            return;
        }

        let execution_id = svc.repository().new_execution_id(self.job_id);
        let plan = {
            let mut state = self.state();
            // the await above may have raced a cancellation landing on the queue
            if state.requested_termination.is_some() || state.status != JobStatus::NotRunning {
                return;
            }
            state.execution_id = Some(execution_id);
            state.status = JobStatus::Starting;
            state.participants = participants.clone();
            state.execution_record.execution_id = Some(execution_id);
            state.execution_record.suspended = false;
            svc.repository()
                .write_execution_record(state.execution_record.clone());
            ExecutionPlan {
                job_id: self.job_id,
                execution_id,
                graph: self.record.graph.clone(),
                participants,
                restore_snapshot_id: state.execution_record.snapshot_id,
            }
        };

        tracing::info!(
            job_id = %self.job_id,
            execution_id = %execution_id,
            participants = plan.participants.len(),
            "Starting execution"
        );

        let ctx = self.clone();
        let svc = svc.clone();
        tokio::spawn(async move {
            let deployed = svc.engine().deploy(plan).await;
            let queue = svc.queue().clone();
            queue.enqueue(move |marker| ctx.on_deploy_completed(svc, marker, execution_id, deployed));
        });
    }

    fn on_deploy_completed(
        self: Arc<Self>,
        svc: JobCoordinationService,
        marker: InQueue,
        execution_id: ExecutionId,
        deployed: std::result::Result<ExecutionCompletion, ExecutionError>,
    ) -> BoxFuture<()> {
        Box::pin(async move {
            if self.execution_id() != Some(execution_id) {
                tracing::debug!(job_id = %self.job_id, execution_id = %execution_id, "Ignoring stale deployment");
                return;
            }
            let completion = match deployed {
                Ok(completion) => completion,
                Err(e) => {
                    tracing::warn!(job_id = %self.job_id, execution_id = %execution_id, error = %e, "Deployment failed");
                    self.state().deploy_failures += 1;
                    self.on_execution_completed(&svc, marker, execution_id, Err(e))
                        .await;
                    return;
                }
            };

            let pending = {
                let mut state = self.state();
                if state.status != JobStatus::Starting {
                    return;
                }
                state.status = JobStatus::Running;
                state.deploy_failures = 0;
                state.requested_termination
            };
            tracing::info!(job_id = %self.job_id, execution_id = %execution_id, "Execution running");

            match pending {
                Some(mode) => self.send_terminate(&svc, execution_id, mode),
                None => {
                    if let Some(interval) = self.config().snapshot_interval() {
                        svc.schedule_snapshot(self.clone(), execution_id, interval);
                    }
                }
            }

            let ctx = self.clone();
            let svc = svc.clone();
            tokio::spawn(async move {
                let result = completion.await.unwrap_or_else(|_| {
                    Err(ExecutionError::Failed(
                        "execution engine dropped the execution".to_string(),
                    ))
                });
                let queue = svc.queue().clone();
                queue.enqueue(move |marker| ctx.execution_completed_task(svc, marker, execution_id, result));
            });
        })
    }

    fn execution_completed_task(
        self: Arc<Self>,
        svc: JobCoordinationService,
        marker: InQueue,
        execution_id: ExecutionId,
        result: std::result::Result<(), ExecutionError>,
    ) -> BoxFuture<()> {
        Box::pin(async move {
            self.on_execution_completed(&svc, marker, execution_id, result)
                .await
        })
    }

    /// Decide what happens after an execution has ended.
    async fn on_execution_completed(
        self: &Arc<Self>,
        svc: &JobCoordinationService,
        marker: InQueue,
        execution_id: ExecutionId,
        result: std::result::Result<(), ExecutionError>,
    ) {
        let (requested, deploy_failures) = {
            let mut state = self.state();
            if state.execution_id != Some(execution_id) || state.status.is_terminal() {
                return;
            }
            for waiter in state.execution_waiters.drain(..) {
                let _ = waiter.send(());
            }
            (state.requested_termination, state.deploy_failures)
        };

        match (requested.map(|m| m.action()), result) {
            (Some(TerminationAction::Restart), _) => {
                {
                    let mut state = self.state();
                    state.status = JobStatus::NotRunning;
                    state.requested_termination = None;
                }
                tracing::info!(job_id = %self.job_id, execution_id = %execution_id, "Restarting job after requested termination");
                self.try_start_job(svc, marker).await;
            }
            (Some(TerminationAction::Suspend), _) => self.suspend(svc),
            (Some(TerminationAction::Cancel), _) => {
                self.finalize_job(svc, marker, Some(ExecutionError::Cancelled))
                    .await
            }
            (None, Ok(())) => self.finalize_job(svc, marker, None).await,
            (None, Err(e)) if e.is_retryable() => {
                if !self.config().auto_scaling {
                    self.on_topology_change_without_restart(svc, marker, e)
                        .await;
                    return;
                }
                if let Some(max) = self.config().max_deploy_attempts {
                    if deploy_failures >= max {
                        tracing::warn!(job_id = %self.job_id, attempts = deploy_failures, "Giving up on job after repeated deploy failures");
                        self.finalize_job(svc, marker, Some(e)).await;
                        return;
                    }
                }
                self.state().status = JobStatus::NotRunning;
                tracing::info!(job_id = %self.job_id, execution_id = %execution_id, error = %e, "Execution failed with a retryable error, scheduling restart");
                svc.schedule_restart(self.job_id);
            }
            (None, Err(e)) => self.finalize_job(svc, marker, Some(e)).await,
        }
    }

    /// The topology changed under a job that must not be restarted
    /// automatically. Jobs with a processing guarantee keep their state and
    /// are suspended, others fail.
    pub(crate) async fn on_topology_change_without_restart(
        self: &Arc<Self>,
        svc: &JobCoordinationService,
        marker: InQueue,
        cause: ExecutionError,
    ) {
        if self.config().processing_guarantee != ProcessingGuarantee::None {
            tracing::info!(job_id = %self.job_id, cause = %cause, "Suspending job since auto-restart is disabled");
            self.suspend(svc);
        } else {
            tracing::info!(job_id = %self.job_id, cause = %cause, "Failing job since auto-restart is disabled");
            self.finalize_job(svc, marker, Some(cause)).await;
        }
    }

    fn suspend(&self, svc: &JobCoordinationService) {
        let mut state = self.state();
        state.status = JobStatus::Suspended;
        state.requested_termination = None;
        state.execution_record.suspended = true;
        svc.repository()
            .write_execution_record(state.execution_record.clone());
        tracing::info!(job_id = %self.job_id, "Job suspended");
    }

    /// Complete the job: persist the result, drop the context from the
    /// coordinator and wake every waiter.
    ///
    /// A cancellation observed while a suspend was requested is the suspend
    /// itself taking effect, so the job is suspended instead of failed.
    pub(crate) async fn finalize_job(
        self: &Arc<Self>,
        svc: &JobCoordinationService,
        marker: InQueue,
        error: Option<ExecutionError>,
    ) {
        let suspend_instead = {
            let mut state = self.state();
            if state.status.is_terminal() || state.status == JobStatus::Completing {
                return;
            }
            let suspending = state.requested_termination == Some(TerminationMode::SuspendGraceful)
                && error.as_ref().is_some_and(|e| e.is_cancellation());
            if !suspending {
                state.status = JobStatus::Completing;
                for waiter in state.execution_waiters.drain(..) {
                    let _ = waiter.send(());
                }
            }
            suspending
        };
        if suspend_instead {
            self.suspend(svc);
            return;
        }

        match svc
            .complete_job(marker, self.clone(), Utc::now(), error)
            .await
        {
            Ok(result) => {
                let status = result.status();
                self.state().status = status;
                tracing::info!(
                    job_id = %self.job_id,
                    status = %status,
                    failure = ?result.failure_text(),
                    "Job completed"
                );
                self.set_final_result_from(&result);
            }
            Err(e) => {
                tracing::error!(job_id = %self.job_id, error = %e, "Failed to complete job");
            }
        }
    }

    /// Record a termination request and start tearing down the execution.
    ///
    /// The first request wins; a conflicting one is rejected with a
    /// description of the pending request. `is_restart` marks requests
    /// issued by the coordinator itself (scale-up, member shutdown, passive
    /// transition): those are satisfied by any pending non-cancel request.
    pub(crate) async fn request_termination(
        self: &Arc<Self>,
        svc: &JobCoordinationService,
        marker: InQueue,
        mode: TerminationMode,
        is_restart: bool,
    ) -> Result<()> {
        let teardown = {
            let mut state = self.state();
            if state.status.is_terminal() || state.status == JobStatus::Completing {
                return Err(CoordError::InvalidState(format!(
                    "job {} is already {}",
                    self.job_id, state.status
                )));
            }
            match state.requested_termination {
                Some(existing) if is_restart && !existing.is_cancel() => Teardown::AlreadyRequested,
                Some(existing) => {
                    return Err(CoordError::InvalidState(format!(
                        "job {} already has a pending {} request",
                        self.job_id, existing
                    )));
                }
                None => match (state.status, state.execution_id) {
                    (JobStatus::Running, Some(execution_id)) => {
                        state.requested_termination = Some(mode);
                        Teardown::Engine(execution_id)
                    }
                    (JobStatus::Starting, _) => {
                        state.requested_termination = Some(mode);
                        Teardown::Deferred
                    }
                    (_, _) if mode.is_cancel() => {
                        state.requested_termination = Some(mode);
                        Teardown::FinalizeNow
                    }
                    (status, _) => {
                        return Err(CoordError::InvalidState(format!(
                            "cannot {} job {} in status {}",
                            mode, self.job_id, status
                        )));
                    }
                },
            }
        };

        match teardown {
            Teardown::AlreadyRequested => {}
            Teardown::Engine(execution_id) => {
                tracing::info!(job_id = %self.job_id, mode = %mode, "Termination requested");
                self.send_terminate(svc, execution_id, mode);
            }
            Teardown::Deferred => {
                tracing::info!(job_id = %self.job_id, mode = %mode, "Termination requested while starting");
            }
            Teardown::FinalizeNow => {
                tracing::info!(job_id = %self.job_id, mode = %mode, "Cancelling job that is not running");
                self.finalize_job(svc, marker, Some(ExecutionError::Cancelled))
                    .await;
            }
        }
        Ok(())
    }

    fn send_terminate(
        self: &Arc<Self>,
        svc: &JobCoordinationService,
        execution_id: ExecutionId,
        mode: TerminationMode,
    ) {
        let ctx = self.clone();
        let svc = svc.clone();
        tokio::spawn(async move {
            let result = svc
                .engine()
                .terminate(ctx.job_id, execution_id, mode.is_graceful())
                .await;
            if let Err(e) = result {
                let queue = svc.queue().clone();
                queue.enqueue(move |marker| ctx.on_terminate_failed(svc, marker, execution_id, mode, e));
            }
        });
    }

    /// A termination request did not reach the execution. Retryable
    /// failures are re-sent after the retry delay, others fail the job.
    fn on_terminate_failed(
        self: Arc<Self>,
        svc: JobCoordinationService,
        marker: InQueue,
        execution_id: ExecutionId,
        mode: TerminationMode,
        error: ExecutionError,
    ) -> BoxFuture<()> {
        Box::pin(async move {
            if !self.is_terminating(execution_id, mode) {
                tracing::debug!(job_id = %self.job_id, execution_id = %execution_id, error = %error, "Ignoring failed termination of stale execution");
                return;
            }
            if error.is_retryable() {
                tracing::warn!(job_id = %self.job_id, execution_id = %execution_id, mode = %mode, error = %error, "Termination request failed, retrying");
                svc.schedule_terminate_retry(self.clone(), execution_id, mode);
            } else {
                tracing::warn!(job_id = %self.job_id, execution_id = %execution_id, mode = %mode, error = %error, "Termination request failed, failing job");
                self.finalize_job(&svc, marker, Some(error)).await;
            }
        })
    }

    /// Timer entry point re-sending a termination request that failed.
    pub(crate) fn resend_terminate(
        self: &Arc<Self>,
        svc: &JobCoordinationService,
        execution_id: ExecutionId,
        mode: TerminationMode,
    ) {
        if self.is_terminating(execution_id, mode) {
            self.send_terminate(svc, execution_id, mode);
        }
    }

    fn is_terminating(&self, execution_id: ExecutionId, mode: TerminationMode) -> bool {
        let state = self.state();
        state.execution_id == Some(execution_id)
            && state.status == JobStatus::Running
            && state.requested_termination == Some(mode)
    }

    /// Resume a suspended job with a new execution.
    pub(crate) async fn resume_job(
        self: &Arc<Self>,
        svc: &JobCoordinationService,
        marker: InQueue,
    ) -> Result<()> {
        {
            let mut state = self.state();
            if state.status != JobStatus::Suspended {
                return Err(CoordError::InvalidState(format!(
                    "job {} is not suspended, status is {}",
                    self.job_id, state.status
                )));
            }
            state.status = JobStatus::NotRunning;
            state.execution_record.suspended = false;
            svc.repository()
                .write_execution_record(state.execution_record.clone());
        }
        tracing::info!(job_id = %self.job_id, "Resuming job");
        self.try_start_job(svc, marker).await;
        Ok(())
    }

    /// Restart the job on a larger member set if it is allowed to scale.
    ///
    /// Returns false when the restart could not be requested yet; the caller
    /// retries later.
    pub(crate) async fn maybe_scale_up(
        self: &Arc<Self>,
        svc: &JobCoordinationService,
        marker: InQueue,
        data_member_count: usize,
    ) -> bool {
        if !self.config().auto_scaling {
            return true;
        }
        let (status, participant_count) = {
            let state = self.state();
            (state.status, state.participants.len())
        };
        // a job that is not running picks up every member on its next start
        if !matches!(status, JobStatus::Starting | JobStatus::Running)
            || participant_count == 0
            || participant_count >= data_member_count
        {
            tracing::debug!(job_id = %self.job_id, status = %status, "Not scaling up, not running or already on all members");
            return true;
        }
        if status == JobStatus::Running
            && self
                .request_termination(svc, marker, TerminationMode::RestartGraceful, false)
                .await
                .is_ok()
        {
            tracing::info!(
                job_id = %self.job_id,
                from = participant_count,
                to = data_member_count,
                "Requested restart to make use of added members"
            );
            return true;
        }
        false
    }

    /// Gracefully restart (or suspend, without auto-scaling) the current
    /// execution. The receiver fires once that execution has ended.
    pub(crate) async fn gracefully_terminate(
        self: &Arc<Self>,
        svc: &JobCoordinationService,
        marker: InQueue,
    ) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state();
            if !matches!(state.status, JobStatus::Starting | JobStatus::Running) {
                let _ = tx.send(());
                return rx;
            }
            state.execution_waiters.push(tx);
        }
        let mode = if self.config().auto_scaling {
            TerminationMode::RestartGraceful
        } else {
            TerminationMode::SuspendGraceful
        };
        if let Err(e) = self.request_termination(svc, marker, mode, true).await {
            tracing::debug!(job_id = %self.job_id, error = %e, "Graceful termination not requested");
        }
        rx
    }

    /// A member announced a graceful shutdown. If it takes part in the
    /// current execution, move the job off it before it leaves.
    pub(crate) async fn on_participant_graceful_shutdown(
        self: &Arc<Self>,
        svc: &JobCoordinationService,
        marker: InQueue,
        uuid: uuid::Uuid,
    ) -> oneshot::Receiver<()> {
        let participates = self.state().participants.iter().any(|m| m.uuid == uuid);
        if !participates {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(());
            return rx;
        }
        tracing::info!(job_id = %self.job_id, member = %uuid, "Participant is shutting down, terminating execution gracefully");
        self.gracefully_terminate(svc, marker).await
    }

    /// Raise the job's quorum size. It never decreases.
    pub(crate) fn update_quorum_size(&self, svc: &JobCoordinationService, quorum_size: usize) {
        let mut state = self.state();
        if quorum_size > state.execution_record.quorum_size {
            tracing::debug!(
                job_id = %self.job_id,
                from = state.execution_record.quorum_size,
                to = quorum_size,
                "Raising job quorum size"
            );
            state.execution_record.quorum_size = quorum_size;
            svc.repository()
                .write_execution_record(state.execution_record.clone());
        }
    }

    /// Timer entry point for periodic snapshots of one execution.
    ///
    /// A timer left over from an earlier execution does nothing.
    pub(crate) fn start_scheduled_snapshot(
        self: Arc<Self>,
        svc: JobCoordinationService,
        execution_id: ExecutionId,
    ) -> BoxFuture<()> {
        Box::pin(async move {
            let snapshot_id = {
                let mut state = self.state();
                if state.execution_id != Some(execution_id)
                    || state.status != JobStatus::Running
                    || state.requested_termination.is_some()
                {
                    tracing::debug!(job_id = %self.job_id, execution_id = %execution_id, "Skipping snapshot of stale execution");
                    return;
                }
                if state.snapshot_in_progress == Some(execution_id) {
                    return;
                }
                state.snapshot_in_progress = Some(execution_id);
                state.execution_record.snapshot_id.map_or(1, |id| id + 1)
            };

            let ctx = self.clone();
            tokio::spawn(async move {
                let result = svc
                    .engine()
                    .snapshot(ctx.job_id, execution_id, snapshot_id)
                    .await;
                let queue = svc.queue().clone();
                queue.enqueue(move |_| async move {
                    ctx.on_snapshot_completed(&svc, execution_id, snapshot_id, result);
                });
            });
        })
    }

    fn on_snapshot_completed(
        self: &Arc<Self>,
        svc: &JobCoordinationService,
        execution_id: ExecutionId,
        snapshot_id: u64,
        result: std::result::Result<(), ExecutionError>,
    ) {
        let reschedule = {
            let mut state = self.state();
            if state.snapshot_in_progress == Some(execution_id) {
                state.snapshot_in_progress = None;
            }
            if state.execution_id != Some(execution_id) {
                return;
            }
            match result {
                Ok(()) => {
                    state.execution_record.snapshot_id = Some(snapshot_id);
                    svc.repository()
                        .write_execution_record(state.execution_record.clone());
                    tracing::debug!(job_id = %self.job_id, snapshot_id, "Snapshot completed");
                }
                Err(e) => {
                    tracing::warn!(job_id = %self.job_id, snapshot_id, error = %e, "Snapshot failed");
                }
            }
            state.status == JobStatus::Running && state.requested_termination.is_none()
        };
        if reschedule {
            if let Some(interval) = self.config().snapshot_interval() {
                svc.schedule_snapshot(self.clone(), execution_id, interval);
            }
        }
    }
}
