//! Membership tests: scale-up, departing members and start readiness.


use std::sync::Arc;
use std::time::Duration;

use jobmaster_lite::cluster::{ClusterState, Member};
use jobmaster_lite::config::JobConfig;
use jobmaster_lite::error::ExecutionError;
use jobmaster_lite::job::{JobStatus, ProcessingGuarantee, TerminationMode};
use jobmaster_lite::repository::{InMemoryJobRepository, JobRepository};
use jobmaster_lite::sim::{LocalCluster, LocalEngine};
use test_harness::{assert_eventually, test_coordinator_config, TestCoordinator, TIMEOUT};

/// A new data member triggers a graceful restart onto the larger cluster.
#[tokio::test]
async fn test_job_scales_up_to_new_member() {
    let mut tc = TestCoordinator::new(2).await;
    let job_id = tc.submit(JobConfig::default()).await;
    let first = tc.wait_for_execution(job_id, None).await;
    assert_eq!(tc.engine.participants(job_id).len(), 2);

    tc.add_member().await;

    let second = tc.wait_for_execution(job_id, Some(first)).await;
    assert!(second > first);
    assert_eq!(tc.engine.participants(job_id).len(), 3);
    assert_eq!(tc.engine.terminations(job_id), vec![true]);
}

/// Members joining in quick succession cause a single restart.
#[tokio::test]
async fn test_scale_up_is_debounced() {
    let mut tc = TestCoordinator::new(2).await;
    let job_id = tc.submit(JobConfig::default()).await;
    tc.wait_for_execution(job_id, None).await;

    tc.add_member().await;
    tc.add_member().await;

    let engine = tc.engine.clone();
    assert_eventually(
        move || {
            let engine = engine.clone();
            async move { engine.participants(job_id).len() == 4 }
        },
        TIMEOUT,
        "job should run on all four members",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(tc.engine.deploy_count(job_id), 2);
}

#[tokio::test]
async fn test_no_scale_up_without_auto_scaling() {
    let mut tc = TestCoordinator::new(2).await;
    let job_id = tc
        .submit(JobConfig::default().with_auto_scaling(false))
        .await;
    tc.wait_for_execution(job_id, None).await;

    tc.add_member().await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(tc.engine.deploy_count(job_id), 1);
    assert_eq!(tc.engine.participants(job_id).len(), 2);
}

#[tokio::test]
async fn test_lite_member_does_not_trigger_scale_up() {
    let tc = TestCoordinator::new(2).await;
    let job_id = tc.submit(JobConfig::default()).await;
    tc.wait_for_execution(job_id, None).await;

    let lite = Member::lite("127.0.0.1:6001");
    tc.cluster.add_member(lite.clone());
    tc.service.on_member_added(&lite).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(tc.engine.deploy_count(job_id), 1);
}

/// A participant leaving fails the execution with a retryable error and
/// the job restarts on the remaining members.
#[tokio::test]
async fn test_member_loss_restarts_job() {
    let mut tc = TestCoordinator::new(3).await;
    let job_id = tc.submit(JobConfig::default()).await;
    let first = tc.wait_for_execution(job_id, None).await;

    let leaving = tc.members[2].uuid;
    tc.remove_member(leaving);

    let second = tc.wait_for_execution(job_id, Some(first)).await;
    assert!(second > first);
    let participants = tc.engine.participants(job_id);
    assert_eq!(participants.len(), 2);
    assert!(participants.iter().all(|m| m.uuid != leaving));
}

/// Without auto-scaling, a topology change suspends jobs that have a
/// processing guarantee and fails the others.
#[tokio::test]
async fn test_member_loss_without_auto_scaling() {
    let mut tc = TestCoordinator::new(3).await;
    let guaranteed = tc
        .submit(
            JobConfig::default()
                .with_auto_scaling(false)
                .with_processing_guarantee(ProcessingGuarantee::AtLeastOnce),
        )
        .await;
    let plain = tc
        .submit(JobConfig::default().with_auto_scaling(false))
        .await;
    let first = tc.wait_for_execution(guaranteed, None).await;
    tc.wait_for_execution(plain, None).await;

    let leaving = tc.members[1].uuid;
    tc.remove_member(leaving);

    assert!(tc.wait_for_status(guaranteed, JobStatus::Suspended).await);
    assert!(tc.wait_for_status(plain, JobStatus::Failed).await);
    assert_eq!(
        tc.repository.job_result(plain).and_then(|r| r.failure),
        Some(ExecutionError::MemberLeft(leaving))
    );

    tc.service.resume_job(guaranteed).await.unwrap();
    tc.wait_for_execution(guaranteed, Some(first)).await;
    assert_eq!(tc.engine.participants(guaranteed).len(), 2);
}

/// Jobs wait while a member reports a different cluster state.
#[tokio::test]
async fn test_start_waits_for_consistent_cluster_state() {
    let tc = TestCoordinator::new(3).await;
    let other = tc.members[1].uuid;
    tc.cluster
        .set_reported_state(other, Some(ClusterState::Frozen));

    let job_id = tc.submit(JobConfig::default()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(tc.engine.deploy_count(job_id), 0);
    assert_eq!(tc.status(job_id).await, JobStatus::NotRunning);

    tc.cluster.set_reported_state(other, None);
    tc.wait_for_execution(job_id, None).await;
}

/// An unreachable member blocks starts until it is known to have left.
#[tokio::test]
async fn test_unreachable_member_blocks_start_until_removed() {
    let tc = TestCoordinator::new(3).await;
    let unreachable = tc.members[2].uuid;
    tc.cluster.set_unreachable(unreachable, true);

    let job_id = tc.submit(JobConfig::default()).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(tc.engine.deploy_count(job_id), 0);

    // the membership layer reported the departure, the view is not updated yet
    tc.service.on_member_removed(unreachable);
    tc.wait_for_execution(job_id, None).await;
}

#[tokio::test]
async fn test_no_start_in_passive_cluster_state() {
    let tc = TestCoordinator::new(2).await;
    tc.cluster.set_cluster_state(ClusterState::Passive);

    let job_id = tc.submit(JobConfig::default()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(tc.engine.deploy_count(job_id), 0);
    assert!(!tc.service.should_start_jobs().await);

    tc.cluster.set_cluster_state(ClusterState::Active);
    tc.wait_for_execution(job_id, None).await;
}

#[tokio::test]
async fn test_no_start_while_node_not_running() {
    let tc = TestCoordinator::new(1).await;
    tc.cluster.set_running(false);
    let job_id = tc.submit(JobConfig::default()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(tc.engine.deploy_count(job_id), 0);

    tc.cluster.set_running(true);
    tc.wait_for_execution(job_id, None).await;
}

/// Restarting a job stays possible after the scale-up is done.
#[tokio::test]
async fn test_manual_restart_after_scale_up() {
    let mut tc = TestCoordinator::new(1).await;
    let job_id = tc.submit(JobConfig::default()).await;
    let first = tc.wait_for_execution(job_id, None).await;
    tc.add_member().await;
    let second = tc.wait_for_execution(job_id, Some(first)).await;

    tc.service
        .terminate_job(job_id, TerminationMode::RestartForceful)
        .await
        .unwrap();
    let third = tc.wait_for_execution(job_id, Some(second)).await;
    assert!(third > second);
    assert_eq!(tc.engine.participants(job_id).len(), 2);
}

/// A suspended job does not keep the scale-up check coming back.
#[tokio::test]
async fn test_suspended_job_does_not_repeat_scale_up() {
    let (cluster, members) = LocalCluster::with_data_members(2);
    let config = test_coordinator_config().with_scan_period(Duration::from_secs(3600));
    let mut tc = TestCoordinator::start_with_config(
        config,
        Arc::new(cluster),
        members,
        LocalEngine::new(),
        Arc::new(InMemoryJobRepository::new()),
    );
    tc.wait_for_initial_scan().await;
    let job_id = tc.submit(JobConfig::default()).await;
    tc.wait_for_execution(job_id, None).await;
    tc.service
        .terminate_job(job_id, TerminationMode::SuspendGraceful)
        .await
        .unwrap();
    assert!(tc.wait_for_status(job_id, JobStatus::Suspended).await);

    let before = tc.cluster.metadata_requests();
    tc.add_member().await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    // one readiness check over the two other members
    assert!(tc.cluster.metadata_requests() - before <= 2);
    assert_eq!(tc.status(job_id).await, JobStatus::Suspended);
    assert_eq!(tc.engine.deploy_count(job_id), 1);
}
