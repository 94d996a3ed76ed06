//! Master-side job coordination.
//!
//! [`JobCoordinationService`] runs on every member but only acts while the
//! local member is the cluster master. It accepts job submissions, keeps a
//! [`MasterContext`] per active job, recovers jobs from the repository after
//! failover and reacts to membership changes.
//!
//! All mutations of coordination state go through a single serialized
//! [`CoordinatorQueue`]; operations already running on it carry an
//! [`InQueue`] marker and call each other directly.

pub mod master_context;
pub mod queue;

use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, watch, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cluster::{ClusterState, ClusterView, Member};
use crate::config::{CoordinatorConfig, JobConfig};
use crate::error::{CoordError, ExecutionError, Result};
use crate::execution::ExecutionEngine;
use crate::job::{
    ExecutionId, JobCompletion, JobExecutionRecord, JobId, JobRecord, JobResult, JobStatus,
    JobSummary, TerminationMode,
};
use crate::repository::JobRepository;

pub use master_context::MasterContext;
pub use queue::{CoordinatorQueue, InQueue};

/// Resolves once the members or jobs being drained have let go.
///
/// Returned when a member announces a graceful shutdown and when the
/// cluster prepares for the passive state.
#[derive(Debug, Clone)]
pub struct DrainAck {
    rx: watch::Receiver<bool>,
}

impl DrainAck {
    fn pending() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    fn done() -> Self {
        let (_tx, rx) = watch::channel(true);
        Self { rx }
    }

    pub fn is_done(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

struct Inner {
    config: CoordinatorConfig,
    repository: Arc<dyn JobRepository>,
    cluster: Arc<dyn ClusterView>,
    engine: Arc<dyn ExecutionEngine>,
    queue: CoordinatorQueue,
    master_contexts: RwLock<HashMap<JobId, Arc<MasterContext>>>,
    members_shutting_down: Mutex<HashMap<Uuid, DrainAck>>,
    removed_members: Mutex<HashMap<Uuid, Instant>>,
    entering_passive: AtomicBool,
    jobs_scanned: AtomicBool,
    scale_up_generation: AtomicU64,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct JobCoordinationService {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl JobCoordinationService {
    /// Create the service and start its queue worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: CoordinatorConfig,
        repository: Arc<dyn JobRepository>,
        cluster: Arc<dyn ClusterView>,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Self {
        let (queue, worker) = CoordinatorQueue::new();
        let shutdown = CancellationToken::new();
        tokio::spawn(worker.run(shutdown.clone()));

        Self {
            inner: Arc::new(Inner {
                config,
                repository,
                cluster,
                engine,
                queue,
                master_contexts: RwLock::new(HashMap::new()),
                members_shutting_down: Mutex::new(HashMap::new()),
                removed_members: Mutex::new(HashMap::new()),
                entering_passive: AtomicBool::new(false),
                jobs_scanned: AtomicBool::new(false),
                scale_up_generation: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    /// Start the periodic scan of persisted jobs.
    pub fn start_scanning(&self) -> JoinHandle<()> {
        let svc = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(svc.inner.config.scan_period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = svc.inner.shutdown.cancelled() => {
                        tracing::debug!("Job scan loop shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let scanner = svc.clone();
                        let result = svc
                            .inner
                            .queue
                            .run(None, move |marker| async move {
                                scanner.scan_jobs(marker).await;
                                scanner.update_quorum_values_in_queue().await;
                                Ok(())
                            })
                            .await;
                        if let Err(e) = result {
                            tracing::error!(error = %e, "Job scan failed");
                        }
                    }
                }
            }
        })
    }

    /// Stop the queue worker, the scan loop and all pending timers.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub(crate) fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.inner.repository
    }

    pub(crate) fn engine(&self) -> &Arc<dyn ExecutionEngine> {
        &self.inner.engine
    }

    pub(crate) fn queue(&self) -> &CoordinatorQueue {
        &self.inner.queue
    }

    fn check_master(&self) -> Result<()> {
        if self.inner.cluster.is_master() {
            Ok(())
        } else {
            Err(CoordError::NotMaster(self.inner.cluster.master()))
        }
    }

    fn check_operational_state(&self) -> Result<()> {
        if self.inner.entering_passive.load(Ordering::SeqCst) {
            Err(CoordError::EnteringPassiveState)
        } else {
            Ok(())
        }
    }

    /// Submit a job. Returns once the job is registered; it starts
    /// asynchronously. Re-submitting the same id is a no-op.
    pub async fn submit_job(&self, job_id: JobId, graph: Vec<u8>, config: JobConfig) -> Result<()> {
        self.check_master()?;
        self.check_operational_state()?;
        let svc = self.clone();
        self.inner
            .queue
            .run(None, move |marker| async move {
                svc.submit_job_in_queue(marker, job_id, graph, config).await
            })
            .await
    }

    async fn submit_job_in_queue(
        &self,
        marker: InQueue,
        job_id: JobId,
        graph: Vec<u8>,
        config: JobConfig,
    ) -> Result<()> {
        self.check_master()?;
        self.check_operational_state()?;

        if self.inner.repository.job_result(job_id).is_some() {
            tracing::debug!(job_id = %job_id, "Not starting job, it already has a result");
            return Ok(());
        }
        if self.inner.master_contexts.read().await.contains_key(&job_id) {
            tracing::debug!(job_id = %job_id, "Job already submitted");
            return Ok(());
        }

        if let Some(name) = &config.name {
            if self.has_active_job_with_name(name).await? {
                // drop whatever a previous attempt of this submission stored
                self.inner.repository.delete_job(job_id);
                return Err(CoordError::JobAlreadyExists {
                    name: name.clone(),
                    job_id,
                });
            }
        }

        if let Some(existing) = self.inner.repository.job_record(job_id) {
            // the client retried after a coordinator change, before the scan
            // picked the job up
            let execution_record = self.ensure_execution_record(job_id);
            self.start_job_if_not_started_or_completed(
                marker,
                existing,
                execution_record,
                "resubmitted by client",
            )
            .await?;
            return Ok(());
        }

        let quorum_size = if config.split_brain_protection {
            self.quorum_size()
        } else {
            0
        };
        let record = JobRecord::new(job_id, graph, config);
        let execution_record = JobExecutionRecord::new(job_id, quorum_size, false);
        let ctx = Arc::new(MasterContext::new(record.clone(), execution_record.clone()));

        {
            let mut contexts = self.inner.master_contexts.write().await;
            match contexts.entry(job_id) {
                Entry::Occupied(_) => return Ok(()),
                Entry::Vacant(slot) => {
                    slot.insert(ctx.clone());
                }
            }
        }

        self.inner.repository.put_new_job_record(record);
        self.inner.repository.write_execution_record(execution_record);

        tracing::info!(job_id = %job_id, name = ?ctx.name(), "Starting job based on submit request");
        let svc = self.clone();
        self.inner
            .queue
            .enqueue(move |marker| async move { ctx.try_start_job(&svc, marker).await });
        Ok(())
    }

    async fn has_active_job_with_name(&self, name: &str) -> Result<bool> {
        if !self.inner.jobs_scanned.load(Ordering::SeqCst) {
            return Err(CoordError::Retryable(
                "job names cannot be checked until the first job scan has completed".to_string(),
            ));
        }
        let contexts = self.inner.master_contexts.read().await;
        Ok(contexts.values().any(|ctx| ctx.name() == Some(name)))
    }

    /// Get the completion future of a job, starting its context if the
    /// coordinator has not picked it up yet.
    pub async fn join_submitted_job(&self, job_id: JobId) -> Result<JobCompletion> {
        self.check_master()?;
        self.check_operational_state()?;
        let svc = self.clone();
        self.inner
            .queue
            .run(None, move |marker| async move {
                if let Some(ctx) = svc.inner.master_contexts.read().await.get(&job_id) {
                    return Ok(ctx.completion());
                }
                if let Some(record) = svc.inner.repository.job_record(job_id) {
                    let execution_record = svc.ensure_execution_record(job_id);
                    return svc
                        .start_job_if_not_started_or_completed(
                            marker,
                            record,
                            execution_record,
                            "join request from client",
                        )
                        .await;
                }
                match svc.inner.repository.job_result(job_id) {
                    Some(result) => Ok(JobCompletion::from_result(&result)),
                    None => Err(CoordError::JobNotFound(job_id)),
                }
            })
            .await
    }

    /// Cancel, restart or suspend a job.
    pub async fn terminate_job(&self, job_id: JobId, mode: TerminationMode) -> Result<()> {
        self.check_master()?;
        let svc = self.clone();
        self.inner
            .queue
            .run(None, move |marker| async move {
                let ctx = svc.inner.master_contexts.read().await.get(&job_id).cloned();
                match ctx {
                    Some(ctx) => {
                        // restarting or suspending is only meaningful for a live execution
                        let status = ctx.status();
                        if !mode.is_cancel() && status != JobStatus::Running {
                            return Err(CoordError::InvalidState(format!(
                                "cannot {mode} job {job_id} in status {status}"
                            )));
                        }
                        ctx.request_termination(&svc, marker, mode, false).await
                    }
                    None => match svc.inner.repository.job_result(job_id) {
                        // cancelling a finished job is a no-op
                        Some(_) if mode.is_cancel() => Ok(()),
                        Some(result) => Err(CoordError::InvalidState(format!(
                            "cannot {mode} job {job_id}, it is already {}",
                            result.status()
                        ))),
                        None if svc.inner.repository.job_record(job_id).is_some() => {
                            Err(CoordError::Retryable(format!(
                                "job {job_id} is not yet picked up by the coordinator"
                            )))
                        }
                        None => Err(CoordError::JobNotFound(job_id)),
                    },
                }
            })
            .await
    }

    /// Resume a suspended job.
    pub async fn resume_job(&self, job_id: JobId) -> Result<()> {
        self.check_master()?;
        let svc = self.clone();
        self.inner
            .queue
            .run(None, move |marker| async move {
                let ctx = svc.inner.master_contexts.read().await.get(&job_id).cloned();
                match ctx {
                    Some(ctx) => ctx.resume_job(&svc, marker).await,
                    None if svc.inner.repository.job_result(job_id).is_some() => {
                        Err(CoordError::InvalidState(format!(
                            "job {job_id} is already completed"
                        )))
                    }
                    None => Err(CoordError::JobNotFound(job_id)),
                }
            })
            .await
    }

    /// Current status of a job. A running job with a pending termination
    /// reports `Completing`.
    pub async fn get_job_status(&self, job_id: JobId) -> Result<JobStatus> {
        self.check_master()?;
        let svc = self.clone();
        self.inner
            .queue
            .run(None, move |_| async move {
                if let Some(ctx) = svc.inner.master_contexts.read().await.get(&job_id) {
                    return Ok(Self::reported_status(ctx));
                }
                if let Some(result) = svc.inner.repository.job_result(job_id) {
                    return Ok(result.status());
                }
                match svc.inner.repository.execution_record(job_id) {
                    Some(record) if record.suspended => Ok(JobStatus::Suspended),
                    Some(_) => Ok(JobStatus::NotRunning),
                    None if svc.inner.repository.job_record(job_id).is_some() => {
                        Ok(JobStatus::NotRunning)
                    }
                    None => Err(CoordError::JobNotFound(job_id)),
                }
            })
            .await
    }

    fn reported_status(ctx: &MasterContext) -> JobStatus {
        match ctx.status() {
            JobStatus::Running if ctx.requested_termination().is_some() => JobStatus::Completing,
            status => status,
        }
    }

    pub async fn get_job_submission_time(&self, job_id: JobId) -> Result<DateTime<Utc>> {
        self.check_master()?;
        if let Some(ctx) = self.inner.master_contexts.read().await.get(&job_id) {
            return Ok(ctx.record().creation_time);
        }
        if let Some(record) = self.inner.repository.job_record(job_id) {
            return Ok(record.creation_time);
        }
        self.inner
            .repository
            .job_result(job_id)
            .map(|r| r.creation_time)
            .ok_or(CoordError::JobNotFound(job_id))
    }

    /// Ids of all known jobs, live or finished.
    pub async fn get_all_job_ids(&self) -> Result<Vec<JobId>> {
        self.check_master()?;
        let mut ids: HashSet<JobId> = self.inner.repository.all_job_ids().into_iter().collect();
        ids.extend(self.inner.master_contexts.read().await.keys().copied());
        let mut ids: Vec<JobId> = ids.into_iter().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Ids of jobs with the given name: the active one first, then finished
    /// ones newest first.
    pub async fn get_job_ids(&self, name: &str) -> Result<Vec<JobId>> {
        self.check_master()?;
        let mut found: HashMap<JobId, (bool, DateTime<Utc>)> = HashMap::new();
        for result in self.inner.repository.job_results_by_name(name) {
            found.insert(result.job_id, (false, result.creation_time));
        }
        for record in self.inner.repository.job_records() {
            if record.name() == Some(name) {
                found.insert(record.job_id, (true, record.creation_time));
            }
        }
        for ctx in self.inner.master_contexts.read().await.values() {
            if ctx.name() == Some(name) {
                found.insert(ctx.job_id(), (true, ctx.record().creation_time));
            }
        }
        let mut ids: Vec<(JobId, (bool, DateTime<Utc>))> = found.into_iter().collect();
        ids.sort_by_key(|(_, key)| Reverse(*key));
        Ok(ids.into_iter().map(|(id, _)| id).collect())
    }

    /// Summaries of all known jobs, newest submission first.
    pub async fn get_job_summary_list(&self) -> Result<Vec<JobSummary>> {
        self.check_master()?;
        let contexts: HashMap<JobId, Arc<MasterContext>> =
            self.inner.master_contexts.read().await.clone();

        let mut summaries: HashMap<JobId, JobSummary> = HashMap::new();
        for record in self.inner.repository.job_records() {
            let summary = match contexts.get(&record.job_id) {
                Some(ctx) => JobSummary {
                    job_id: record.job_id,
                    execution_id: ctx.execution_id(),
                    name: record.name_or_id(),
                    status: Self::reported_status(ctx),
                    submission_time: record.creation_time,
                    completion_time: None,
                    failure_text: None,
                },
                None => {
                    let execution_record = self.inner.repository.execution_record(record.job_id);
                    JobSummary {
                        job_id: record.job_id,
                        execution_id: execution_record.as_ref().and_then(|r| r.execution_id),
                        name: record.name_or_id(),
                        status: match execution_record {
                            Some(r) if r.suspended => JobStatus::Suspended,
                            _ => JobStatus::NotRunning,
                        },
                        submission_time: record.creation_time,
                        completion_time: None,
                        failure_text: None,
                    }
                }
            };
            summaries.insert(record.job_id, summary);
        }
        // a result wins over a record still being cleaned up
        for result in self.inner.repository.job_results() {
            summaries.insert(result.job_id, JobSummary::from_result(&result));
        }

        let mut summaries: Vec<JobSummary> = summaries.into_values().collect();
        summaries.sort_by_key(|s| Reverse(s.submission_time));
        Ok(summaries)
    }

    /// A member announced a graceful shutdown. The returned ack resolves
    /// once every job running on it has been moved off.
    pub async fn add_shutting_down_member(&self, uuid: Uuid) -> DrainAck {
        let (tx, ack) = {
            let mut shutting_down = lock(&self.inner.members_shutting_down);
            if let Some(existing) = shutting_down.get(&uuid) {
                return existing.clone();
            }
            if lock(&self.inner.removed_members).contains_key(&uuid) {
                tracing::debug!(member = %uuid, "Shutdown notice from a member that already left");
                return DrainAck::done();
            }
            let (tx, ack) = DrainAck::pending();
            shutting_down.insert(uuid, ack.clone());
            (tx, ack)
        };
        tracing::debug!(member = %uuid, "Added a shutting-down member");

        let svc = self.clone();
        tokio::spawn(async move {
            let notifier = svc.clone();
            let waiters = svc
                .inner
                .queue
                .run(None, move |marker| async move {
                    let contexts: Vec<Arc<MasterContext>> = notifier
                        .inner
                        .master_contexts
                        .read()
                        .await
                        .values()
                        .cloned()
                        .collect();
                    let mut waiters = Vec::with_capacity(contexts.len());
                    for ctx in contexts {
                        waiters.push(
                            ctx.on_participant_graceful_shutdown(&notifier, marker, uuid)
                                .await,
                        );
                    }
                    Ok(waiters)
                })
                .await
                .unwrap_or_default();
            for waiter in waiters {
                let _ = waiter.await;
            }
            tracing::debug!(member = %uuid, "Jobs moved off shutting-down member");
            let _ = tx.send(true);
        });
        ack
    }

    pub async fn on_member_added(&self, member: &Member) {
        lock(&self.inner.removed_members).remove(&member.uuid);
        if member.lite {
            return;
        }
        self.update_quorum_values().await;
        self.schedule_scale_up(self.inner.config.scale_up_delay);
    }

    pub fn on_member_removed(&self, uuid: Uuid) {
        if lock(&self.inner.members_shutting_down).remove(&uuid).is_some() {
            tracing::debug!(member = %uuid, "Removed a shutting-down member");
        } else {
            let retention = self.inner.config.removed_member_retention;
            let mut removed = lock(&self.inner.removed_members);
            removed.insert(uuid, Instant::now());
            removed.retain(|_, at| at.elapsed() < retention);
        }
    }

    pub fn is_member_shutting_down(&self, uuid: Uuid) -> bool {
        lock(&self.inner.members_shutting_down).contains_key(&uuid)
    }

    pub fn data_member_count(&self) -> usize {
        self.inner.cluster.data_members().len()
    }

    /// Majority of the current data members.
    pub fn quorum_size(&self) -> usize {
        self.data_member_count() / 2 + 1
    }

    pub fn is_quorum_present(&self, quorum_size: usize) -> bool {
        self.data_member_count() >= quorum_size
    }

    /// Raise stored quorum sizes of split-brain protected jobs to match the
    /// current cluster size.
    pub async fn update_quorum_values(&self) {
        let svc = self.clone();
        let result = self
            .inner
            .queue
            .run(None, move |_| async move {
                svc.update_quorum_values_in_queue().await;
                Ok(())
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to update quorum values");
        }
    }

    async fn update_quorum_values_in_queue(&self) {
        if !self.inner.cluster.is_master() {
            return;
        }
        let quorum_size = self.quorum_size();
        let contexts: Vec<Arc<MasterContext>> =
            self.inner.master_contexts.read().await.values().cloned().collect();
        for ctx in contexts {
            if ctx.config().split_brain_protection {
                ctx.update_quorum_size(self, quorum_size);
            }
        }
        for record in self.inner.repository.job_records() {
            if record.config.split_brain_protection
                && self
                    .inner
                    .repository
                    .update_quorum_size_if_smaller(record.job_id, quorum_size)
            {
                tracing::debug!(job_id = %record.job_id, quorum_size, "Raised stored quorum size");
            }
        }
    }

    /// Schedule a scale-up check. A newer schedule supersedes older ones.
    pub fn schedule_scale_up(&self, delay: Duration) {
        let generation = self.inner.scale_up_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let svc = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = svc.inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let scaler = svc.clone();
            let result = svc
                .inner
                .queue
                .run(None, move |marker| async move {
                    scaler.scale_jobs_up_now(marker, generation).await;
                    Ok(())
                })
                .await;
            if let Err(e) = result {
                tracing::debug!(error = %e, "Scale-up check not run");
            }
        });
    }

    async fn scale_jobs_up_now(&self, marker: InQueue, generation: u64) {
        if generation != self.inner.scale_up_generation.load(Ordering::SeqCst) {
            tracing::debug!(generation, "Scale-up check superseded");
            return;
        }
        if !self.should_start_jobs().await {
            self.schedule_scale_up(self.inner.config.retry_delay);
            return;
        }
        let target = self
            .data_member_count()
            .min(self.inner.cluster.partition_count());
        let contexts: Vec<Arc<MasterContext>> =
            self.inner.master_contexts.read().await.values().cloned().collect();
        let mut all_done = true;
        for ctx in contexts {
            all_done &= ctx.maybe_scale_up(self, marker, target).await;
        }
        if !all_done {
            self.schedule_scale_up(self.inner.config.retry_delay);
        }
    }

    /// Whether new executions may be started right now.
    pub async fn should_start_jobs(&self) -> bool {
        let cluster = &self.inner.cluster;
        if !cluster.is_master() || !cluster.is_running() {
            return false;
        }
        if self.inner.entering_passive.load(Ordering::SeqCst) {
            return false;
        }
        let state = cluster.cluster_state();
        if !state.allows_jobs() {
            tracing::debug!(state = %state, "Not starting jobs in current cluster state");
            return false;
        }
        if !lock(&self.inner.members_shutting_down).is_empty() {
            tracing::debug!("Not starting jobs while members are shutting down");
            return false;
        }
        if !cluster.partition_status().is_settled() {
            tracing::debug!("Not starting jobs while partitions are not settled");
            return false;
        }
        self.all_members_have_same_state(state).await
    }

    async fn all_members_have_same_state(&self, expected: ClusterState) -> bool {
        let local = self.inner.cluster.local_member().uuid;
        let timeout = self.inner.config.metadata_timeout;
        let mut requests = JoinSet::new();
        for member in self.inner.cluster.members() {
            if member.uuid == local {
                continue;
            }
            let cluster = self.inner.cluster.clone();
            requests.spawn(async move {
                let result = tokio::time::timeout(timeout, cluster.fetch_metadata(&member)).await;
                (member, result)
            });
        }

        let mut all_same = true;
        while let Some(joined) = requests.join_next().await {
            let (member, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "Cluster metadata request aborted");
                    all_same = false;
                    continue;
                }
            };
            let departed = lock(&self.inner.removed_members).contains_key(&member.uuid);
            match result {
                Ok(Ok(metadata)) if metadata.state == expected => {}
                Ok(Ok(metadata)) => {
                    tracing::debug!(member = %member.uuid, state = %metadata.state, expected = %expected, "Member reports a different cluster state");
                    all_same = false;
                }
                Ok(Err(ExecutionError::MemberLeft(_) | ExecutionError::TargetNotMember(_))) => {}
                Ok(Err(_)) | Err(_) if departed => {}
                Ok(Err(e)) => {
                    tracing::warn!(member = %member.uuid, error = %e, "Failed to fetch cluster metadata");
                    all_same = false;
                }
                Err(_) => {
                    tracing::warn!(member = %member.uuid, "Cluster metadata request timed out");
                    all_same = false;
                }
            }
        }
        all_same
    }

    /// Data members that may take part in a new execution.
    pub(crate) fn execution_participants(&self) -> Vec<Member> {
        let shutting_down = lock(&self.inner.members_shutting_down);
        self.inner
            .cluster
            .data_members()
            .into_iter()
            .filter(|m| !shutting_down.contains_key(&m.uuid))
            .collect()
    }

    /// Recover jobs persisted by an earlier coordinator and garbage-collect
    /// the repository.
    pub async fn scan_jobs(&self, marker: InQueue) {
        if !self.should_start_jobs().await {
            return;
        }
        for record in self.inner.repository.job_records() {
            let job_id = record.job_id;
            let execution_record = self.ensure_execution_record(job_id);
            if let Err(e) = self
                .start_job_if_not_started_or_completed(
                    marker,
                    record,
                    execution_record,
                    "discovered by scanning of job records",
                )
                .await
            {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to start scanned job");
            }
        }
        self.inner.repository.cleanup(
            Utc::now(),
            self.inner.config.job_result_ttl,
            self.inner.config.max_job_results,
        );
        if !self.inner.jobs_scanned.swap(true, Ordering::SeqCst) {
            tracing::info!("Initial job scan complete");
        }
    }

    fn ensure_execution_record(&self, job_id: JobId) -> JobExecutionRecord {
        if let Some(record) = self.inner.repository.execution_record(job_id) {
            return record;
        }
        let record = JobExecutionRecord::new(job_id, self.quorum_size(), false);
        self.inner.repository.write_execution_record(record.clone());
        record
    }

    async fn start_job_if_not_started_or_completed(
        &self,
        marker: InQueue,
        record: JobRecord,
        execution_record: JobExecutionRecord,
        reason: &str,
    ) -> Result<JobCompletion> {
        let job_id = record.job_id;
        if let Some(result) = self.inner.repository.job_result(job_id) {
            return Ok(JobCompletion::from_result(&result));
        }
        self.check_operational_state()?;

        let ctx = Arc::new(MasterContext::new(record, execution_record));
        {
            let mut contexts = self.inner.master_contexts.write().await;
            match contexts.entry(job_id) {
                Entry::Occupied(existing) => return Ok(existing.get().completion()),
                Entry::Vacant(slot) => {
                    slot.insert(ctx.clone());
                }
            }
        }

        if self
            .complete_master_context_if_job_already_completed(marker, &ctx)
            .await
        {
            return Ok(ctx.completion());
        }

        if ctx.status() == JobStatus::Suspended {
            tracing::debug!(job_id = %job_id, "Created context for suspended job");
        } else if !ctx.status().is_terminal() {
            tracing::info!(job_id = %job_id, reason, "Starting job");
            ctx.try_start_job(self, marker).await;
        }
        Ok(ctx.completion())
    }

    /// Resolve a freshly inserted context whose job finished in the
    /// meantime, and handle jobs that ran before but must not be restarted
    /// automatically. Returns true if the context was completed.
    async fn complete_master_context_if_job_already_completed(
        &self,
        marker: InQueue,
        ctx: &Arc<MasterContext>,
    ) -> bool {
        let job_id = ctx.job_id();
        if let Some(result) = self.inner.repository.job_result(job_id) {
            tracing::debug!(job_id = %job_id, "Completing context of already finished job");
            ctx.set_final_result_from(&result);
            self.remove_context_if_same(ctx).await;
            return true;
        }
        if !ctx.config().auto_scaling
            && !ctx.is_suspended()
            && self.inner.repository.execution_id_count(job_id) > 0
        {
            tracing::info!(job_id = %job_id, "Job ran before and auto-restart is disabled");
            ctx.on_topology_change_without_restart(self, marker, ExecutionError::TopologyChanged)
                .await;
            return ctx.status().is_terminal();
        }
        false
    }

    async fn remove_context_if_same(&self, ctx: &Arc<MasterContext>) -> bool {
        let mut contexts = self.inner.master_contexts.write().await;
        match contexts.get(&ctx.job_id()) {
            Some(current) if Arc::ptr_eq(current, ctx) => {
                contexts.remove(&ctx.job_id());
                true
            }
            _ => false,
        }
    }

    /// Persist the job result and drop the context.
    pub(crate) async fn complete_job(
        &self,
        marker: InQueue,
        ctx: Arc<MasterContext>,
        completion_time: DateTime<Utc>,
        failure: Option<ExecutionError>,
    ) -> Result<JobResult> {
        let svc = self.clone();
        self.inner
            .queue
            .run(Some(marker), move |_| async move {
                let job_id = ctx.job_id();
                let coordinator = svc.inner.cluster.local_member().uuid;
                let result = svc.inner.repository.complete_job(
                    ctx.record(),
                    coordinator,
                    completion_time,
                    failure,
                );
                if !svc.remove_context_if_same(&ctx).await {
                    if svc.inner.master_contexts.read().await.contains_key(&job_id) {
                        tracing::error!(job_id = %job_id, "Different master context found for completed job");
                    } else {
                        tracing::error!(job_id = %job_id, "No master context found for completed job");
                    }
                }
                Ok(result)
            })
            .await
    }

    /// Retry starting a job after the configured delay.
    pub(crate) fn schedule_restart(&self, job_id: JobId) {
        let svc = self.clone();
        let delay = self.inner.config.retry_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = svc.inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let restarter = svc.clone();
            svc.inner.queue.enqueue(move |marker| async move {
                restarter.restart_job(marker, job_id).await
            });
        });
    }

    async fn restart_job(&self, marker: InQueue, job_id: JobId) {
        let ctx = self.inner.master_contexts.read().await.get(&job_id).cloned();
        match ctx {
            Some(ctx) => ctx.try_start_job(self, marker).await,
            None => tracing::debug!(job_id = %job_id, "Not restarting job, it is no longer active"),
        }
    }

    /// Trigger a snapshot of the given execution after `interval`.
    pub(crate) fn schedule_snapshot(
        &self,
        ctx: Arc<MasterContext>,
        execution_id: ExecutionId,
        interval: Duration,
    ) {
        let svc = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = svc.inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            let snapshotter = svc.clone();
            svc.inner.queue.enqueue(move |_| {
                ctx.start_scheduled_snapshot(snapshotter, execution_id)
            });
        });
    }

    /// Re-send a failed termination request after the retry delay.
    pub(crate) fn schedule_terminate_retry(
        &self,
        ctx: Arc<MasterContext>,
        execution_id: ExecutionId,
        mode: TerminationMode,
    ) {
        let svc = self.clone();
        let delay = self.inner.config.retry_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = svc.inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let sender = svc.clone();
            svc.inner.queue.enqueue(move |_| async move {
                ctx.resend_terminate(&sender, execution_id, mode)
            });
        });
    }

    /// Stop starting jobs and gracefully restart every running one, so the
    /// cluster can move to the passive state. The ack resolves once all
    /// executions have ended.
    pub async fn prepare_for_passive_cluster_state(&self) -> Result<DrainAck> {
        self.check_master()?;
        self.inner.entering_passive.store(true, Ordering::SeqCst);
        tracing::info!("Preparing for passive cluster state");

        let svc = self.clone();
        let waiters = self
            .inner
            .queue
            .run(None, move |marker| async move {
                let contexts: Vec<Arc<MasterContext>> =
                    svc.inner.master_contexts.read().await.values().cloned().collect();
                let mut waiters: Vec<oneshot::Receiver<()>> = Vec::with_capacity(contexts.len());
                for ctx in contexts {
                    waiters.push(ctx.gracefully_terminate(&svc, marker).await);
                }
                Ok(waiters)
            })
            .await?;

        let (tx, ack) = DrainAck::pending();
        tokio::spawn(async move {
            for waiter in waiters {
                let _ = waiter.await;
            }
            let _ = tx.send(true);
        });
        Ok(ack)
    }

    /// The cluster state change finished; jobs may start again.
    pub fn cluster_change_done(&self) {
        if self.inner.entering_passive.swap(false, Ordering::SeqCst) {
            tracing::info!("Cluster state change done, resuming job starts");
        }
    }

    /// Drop all coordination state after losing mastership. Waiters of live
    /// contexts resolve as cancelled.
    pub async fn reset(&self) -> Result<()> {
        if self.inner.cluster.is_master() {
            return Err(CoordError::InvalidState(
                "cannot reset while being the master".to_string(),
            ));
        }
        let svc = self.clone();
        self.inner
            .queue
            .run(None, move |_| async move {
                svc.inner.scale_up_generation.fetch_add(1, Ordering::SeqCst);
                let contexts: Vec<Arc<MasterContext>> = svc
                    .inner
                    .master_contexts
                    .write()
                    .await
                    .drain()
                    .map(|(_, ctx)| ctx)
                    .collect();
                svc.inner.jobs_scanned.store(false, Ordering::SeqCst);
                tracing::info!(contexts = contexts.len(), "Reset job coordination state");
                for ctx in contexts {
                    ctx.set_final_result(Err(ExecutionError::Cancelled));
                }
                Ok(())
            })
            .await
    }

    pub fn jobs_scanned(&self) -> bool {
        self.inner.jobs_scanned.load(Ordering::SeqCst)
    }

    pub async fn master_context(&self, job_id: JobId) -> Option<Arc<MasterContext>> {
        self.inner.master_contexts.read().await.get(&job_id).cloned()
    }

    pub async fn master_contexts(&self) -> Vec<Arc<MasterContext>> {
        self.inner.master_contexts.read().await.values().cloned().collect()
    }
}
