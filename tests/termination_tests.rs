//! Termination tests: cancel, restart, suspend and resume.


use std::sync::Arc;
use std::time::Duration;

use jobmaster_lite::cluster::PartitionStatus;
use jobmaster_lite::config::JobConfig;
use jobmaster_lite::error::{CoordError, ExecutionError};
use jobmaster_lite::job::{JobId, JobStatus, ProcessingGuarantee, TerminationMode};
use jobmaster_lite::repository::{InMemoryJobRepository, JobRepository};
use jobmaster_lite::sim::{LocalCluster, LocalEngine};
use test_harness::{assert_eventually, TestCoordinator, TIMEOUT};

#[tokio::test]
async fn test_cancel_running_job() {
    let tc = TestCoordinator::new(2).await;
    let job_id = tc.submit(JobConfig::default()).await;
    tc.wait_for_execution(job_id, None).await;
    let completion = tc.service.join_submitted_job(job_id).await.unwrap();

    tc.service
        .terminate_job(job_id, TerminationMode::CancelForceful)
        .await
        .unwrap();

    let outcome = tokio::time::timeout(TIMEOUT, completion.wait())
        .await
        .expect("cancelled job should complete");
    assert_eq!(outcome, Err(ExecutionError::Cancelled));
    assert_eq!(tc.status(job_id).await, JobStatus::Failed);
    assert_eq!(tc.engine.terminations(job_id), vec![false]);
}

/// A termination request the engine could not deliver because of a
/// topology change is sent again.
#[tokio::test]
async fn test_failed_termination_is_retried() {
    let tc = TestCoordinator::new(2).await;
    let job_id = tc.submit(JobConfig::default()).await;
    tc.wait_for_execution(job_id, None).await;
    let completion = tc.service.join_submitted_job(job_id).await.unwrap();

    tc.engine.fail_next_terminate(ExecutionError::TopologyChanged);
    tc.service
        .terminate_job(job_id, TerminationMode::CancelForceful)
        .await
        .unwrap();

    let outcome = tokio::time::timeout(TIMEOUT, completion.wait())
        .await
        .expect("cancel should be re-sent");
    assert_eq!(outcome, Err(ExecutionError::Cancelled));
    assert_eq!(tc.status(job_id).await, JobStatus::Failed);
    assert_eq!(tc.engine.terminations(job_id), vec![false, false]);
}

/// A termination request that fails for good fails the job with that
/// error instead of leaving it running.
#[tokio::test]
async fn test_fatal_termination_failure_fails_job() {
    let tc = TestCoordinator::new(2).await;
    let job_id = tc.submit(JobConfig::default()).await;
    tc.wait_for_execution(job_id, None).await;
    let completion = tc.service.join_submitted_job(job_id).await.unwrap();

    let error = ExecutionError::Failed("member unreachable".into());
    tc.engine.fail_next_terminate(error.clone());
    tc.service
        .terminate_job(job_id, TerminationMode::CancelForceful)
        .await
        .unwrap();

    let outcome = tokio::time::timeout(TIMEOUT, completion.wait())
        .await
        .expect("job should not hang after a failed cancel");
    assert_eq!(outcome, Err(error.clone()));
    assert_eq!(tc.status(job_id).await, JobStatus::Failed);
    assert_eq!(
        tc.repository.job_result(job_id).and_then(|r| r.failure),
        Some(error)
    );
    assert_eq!(tc.engine.terminations(job_id), vec![false]);

    // finished now, so another cancel is a no-op
    tc.service
        .terminate_job(job_id, TerminationMode::CancelForceful)
        .await
        .unwrap();
}

/// Cancelling a finished job is a no-op; restarting it is an error.
#[tokio::test]
async fn test_terminating_finished_job() {
    let tc = TestCoordinator::new(2).await;
    let job_id = tc.submit(JobConfig::default()).await;
    tc.wait_for_execution(job_id, None).await;
    tc.engine.complete_job(job_id);
    assert!(tc.wait_for_status(job_id, JobStatus::Completed).await);

    tc.service
        .terminate_job(job_id, TerminationMode::CancelGraceful)
        .await
        .unwrap();
    assert!(matches!(
        tc.service
            .terminate_job(job_id, TerminationMode::RestartGraceful)
            .await,
        Err(CoordError::InvalidState(_))
    ));
    assert_eq!(tc.status(job_id).await, JobStatus::Completed);
}

#[tokio::test]
async fn test_terminating_unknown_job() {
    let tc = TestCoordinator::new(1).await;
    let unknown = JobId::new(0xabc);
    assert_eq!(
        tc.service
            .terminate_job(unknown, TerminationMode::CancelForceful)
            .await,
        Err(CoordError::JobNotFound(unknown))
    );
    assert_eq!(
        tc.service.resume_job(unknown).await,
        Err(CoordError::JobNotFound(unknown))
    );
}

/// A graceful restart tears the execution down and starts a newer one.
#[tokio::test]
async fn test_restart_starts_new_execution() {
    let tc = TestCoordinator::new(2).await;
    let job_id = tc.submit(JobConfig::default()).await;
    let first = tc.wait_for_execution(job_id, None).await;

    tc.service
        .terminate_job(job_id, TerminationMode::RestartGraceful)
        .await
        .unwrap();
    let second = tc.wait_for_execution(job_id, Some(first)).await;
    assert!(second > first);
    assert_eq!(tc.engine.terminations(job_id), vec![true]);
    assert!(tc.service.master_context(job_id).await.is_some());
}

#[tokio::test]
async fn test_suspend_and_resume() {
    let tc = TestCoordinator::new(2).await;
    let job_id = tc.submit(JobConfig::default()).await;
    let first = tc.wait_for_execution(job_id, None).await;

    tc.service
        .terminate_job(job_id, TerminationMode::SuspendGraceful)
        .await
        .unwrap();
    assert!(tc.wait_for_status(job_id, JobStatus::Suspended).await);
    assert!(tc.repository.execution_record(job_id).unwrap().suspended);
    assert!(tc.engine.running_execution(job_id).is_none());

    // restart only applies to a running job
    assert!(matches!(
        tc.service
            .terminate_job(job_id, TerminationMode::RestartGraceful)
            .await,
        Err(CoordError::InvalidState(_))
    ));

    tc.service.resume_job(job_id).await.unwrap();
    let second = tc.wait_for_execution(job_id, Some(first)).await;
    assert!(second > first);
    assert!(!tc.repository.execution_record(job_id).unwrap().suspended);

    assert!(matches!(
        tc.service.resume_job(job_id).await,
        Err(CoordError::InvalidState(_))
    ));
}

/// While a termination is pending the job reports COMPLETING and further
/// requests are rejected.
#[tokio::test]
async fn test_first_termination_request_wins() {
    let tc = TestCoordinator::new(2).await;
    let job_id = tc.submit(JobConfig::default()).await;
    tc.wait_for_execution(job_id, None).await;
    tc.engine.hold_terminations(true);

    tc.service
        .terminate_job(job_id, TerminationMode::SuspendGraceful)
        .await
        .unwrap();
    assert_eq!(tc.status(job_id).await, JobStatus::Completing);

    let err = tc
        .service
        .terminate_job(job_id, TerminationMode::CancelForceful)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordError::InvalidState(_)));

    // the execution finally stops the way a suspended job does
    tc.engine.fail_job(job_id, ExecutionError::Cancelled);
    assert!(tc.wait_for_status(job_id, JobStatus::Suspended).await);
}

/// A job that has not started yet is cancelled without an execution.
#[tokio::test]
async fn test_cancel_job_that_is_not_running() {
    let (cluster, members) = LocalCluster::with_data_members(1);
    let tc = TestCoordinator::start(
        Arc::new(cluster),
        members,
        LocalEngine::new(),
        Arc::new(InMemoryJobRepository::new()),
    );
    tc.wait_for_initial_scan().await;
    tc.cluster.set_partition_status(PartitionStatus {
        initialized: false,
        ..PartitionStatus::settled()
    });

    let job_id = tc.submit(JobConfig::default()).await;
    let completion = tc.service.join_submitted_job(job_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(tc.status(job_id).await, JobStatus::NotRunning);

    tc.service
        .terminate_job(job_id, TerminationMode::CancelForceful)
        .await
        .unwrap();
    assert_eq!(completion.wait().await, Err(ExecutionError::Cancelled));
    assert_eq!(tc.status(job_id).await, JobStatus::Failed);
    assert_eq!(tc.engine.deploy_count(job_id), 0);
}

#[tokio::test]
async fn test_cancel_suspended_job() {
    let tc = TestCoordinator::new(2).await;
    let job_id = tc.submit(JobConfig::default()).await;
    tc.wait_for_execution(job_id, None).await;
    tc.service
        .terminate_job(job_id, TerminationMode::SuspendGraceful)
        .await
        .unwrap();
    assert!(tc.wait_for_status(job_id, JobStatus::Suspended).await);

    tc.service
        .terminate_job(job_id, TerminationMode::CancelGraceful)
        .await
        .unwrap();
    assert!(tc.wait_for_status(job_id, JobStatus::Failed).await);
    assert_eq!(
        tc.repository.job_result(job_id).unwrap().failure,
        Some(ExecutionError::Cancelled)
    );
}

/// Snapshots are taken periodically for jobs with a processing guarantee
/// and the latest one is restored by the next execution.
#[tokio::test]
async fn test_snapshots_are_taken_and_restored() {
    let tc = TestCoordinator::new(2).await;
    let job_id = tc
        .submit(
            JobConfig::default()
                .with_processing_guarantee(ProcessingGuarantee::ExactlyOnce)
                .with_snapshot_interval_ms(30),
        )
        .await;
    let first = tc.wait_for_execution(job_id, None).await;

    let engine = tc.engine.clone();
    assert_eventually(
        move || {
            let engine = engine.clone();
            async move { engine.snapshot_ids(job_id).len() >= 2 }
        },
        TIMEOUT,
        "periodic snapshots should be taken",
    )
    .await;
    let ids = tc.engine.snapshot_ids(job_id);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(ids[0], 1);

    let repository = tc.repository.clone();
    assert_eventually(
        move || {
            let repository = repository.clone();
            async move {
                repository
                    .execution_record(job_id)
                    .and_then(|r| r.snapshot_id)
                    .is_some()
            }
        },
        TIMEOUT,
        "snapshot id should be persisted",
    )
    .await;

    tc.service
        .terminate_job(job_id, TerminationMode::RestartGraceful)
        .await
        .unwrap();
    tc.wait_for_execution(job_id, Some(first)).await;
    let restored = tc.engine.restored_snapshot(job_id);
    assert!(restored.is_some());
    assert!(restored <= tc.engine.snapshot_ids(job_id).last().copied());
}

#[tokio::test]
async fn test_no_snapshots_without_guarantee() {
    let tc = TestCoordinator::new(2).await;
    let job_id = tc
        .submit(JobConfig::default().with_snapshot_interval_ms(20))
        .await;
    tc.wait_for_execution(job_id, None).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(tc.engine.snapshot_ids(job_id).is_empty());
}

/// A snapshot still in flight when the job restarts does not hold back
/// snapshots of the new execution, and the old execution gets no more.
#[tokio::test]
async fn test_snapshot_in_flight_across_restart() {
    let tc = TestCoordinator::new(2).await;
    tc.engine.hold_snapshots(true);
    let job_id = tc
        .submit(
            JobConfig::default()
                .with_processing_guarantee(ProcessingGuarantee::ExactlyOnce)
                .with_snapshot_interval_ms(30),
        )
        .await;
    let first = tc.wait_for_execution(job_id, None).await;

    let engine = tc.engine.clone();
    assert_eventually(
        move || {
            let engine = engine.clone();
            async move { engine.snapshot_requests(job_id).contains(&first) }
        },
        TIMEOUT,
        "first execution should request a snapshot",
    )
    .await;

    tc.service
        .terminate_job(job_id, TerminationMode::RestartGraceful)
        .await
        .unwrap();
    let second = tc.wait_for_execution(job_id, Some(first)).await;
    tc.engine.hold_snapshots(false);

    let engine = tc.engine.clone();
    assert_eventually(
        move || {
            let engine = engine.clone();
            async move { engine.snapshots_of(job_id, second).len() >= 2 }
        },
        TIMEOUT,
        "new execution should take snapshots",
    )
    .await;

    let stale = |requests: Vec<_>| requests.into_iter().filter(|id| *id == first).count();
    let before = stale(tc.engine.snapshot_requests(job_id));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(stale(tc.engine.snapshot_requests(job_id)), before);
    assert!(tc.engine.snapshots_of(job_id, first).is_empty());
}
