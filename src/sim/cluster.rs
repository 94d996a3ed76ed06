use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::cluster::{ClusterMetadata, ClusterState, ClusterView, Member, PartitionStatus};
use crate::error::ExecutionError;

const DEFAULT_PARTITION_COUNT: usize = 271;

#[derive(Debug)]
struct ClusterInner {
    local: Member,
    members: Vec<Member>,
    master: Option<Uuid>,
    state: ClusterState,
    /// Per-member state overrides for metadata requests.
    reported: HashMap<Uuid, ClusterState>,
    unreachable: HashSet<Uuid>,
    partitions: PartitionStatus,
    partition_count: usize,
    running: bool,
    metadata_requests: usize,
}

/// In-process membership view of one member.
///
/// Each coordinator instance gets its own view; tests drive membership
/// changes, master election and cluster state by hand.
#[derive(Debug)]
pub struct LocalCluster {
    inner: Mutex<ClusterInner>,
}

impl LocalCluster {
    /// A single-member cluster whose local member is the master.
    pub fn new(local: Member) -> Self {
        Self {
            inner: Mutex::new(ClusterInner {
                master: Some(local.uuid),
                members: vec![local.clone()],
                local,
                state: ClusterState::Active,
                reported: HashMap::new(),
                unreachable: HashSet::new(),
                partitions: PartitionStatus::settled(),
                partition_count: DEFAULT_PARTITION_COUNT,
                running: true,
                metadata_requests: 0,
            }),
        }
    }

    /// A cluster of `size` data members. The first one is local and master.
    pub fn with_data_members(size: usize) -> (Self, Vec<Member>) {
        let members: Vec<Member> = (0..size.max(1))
            .map(|i| Member::data(format!("127.0.0.1:{}", 5701 + i)))
            .collect();
        let cluster = Self::new(members[0].clone());
        for member in &members[1..] {
            cluster.add_member(member.clone());
        }
        (cluster, members)
    }

    /// The view of the same membership from another member.
    pub fn view_from(&self, local: Uuid) -> Option<Self> {
        let inner = self.inner();
        let local = inner.members.iter().find(|m| m.uuid == local)?.clone();
        Some(Self {
            inner: Mutex::new(ClusterInner {
                local,
                members: inner.members.clone(),
                master: inner.master,
                state: inner.state,
                reported: inner.reported.clone(),
                unreachable: inner.unreachable.clone(),
                partitions: inner.partitions,
                partition_count: inner.partition_count,
                running: true,
                metadata_requests: 0,
            }),
        })
    }

    /// Number of metadata requests received so far.
    pub fn metadata_requests(&self) -> usize {
        self.inner().metadata_requests
    }

    fn inner(&self) -> MutexGuard<'_, ClusterInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_member(&self, member: Member) {
        let mut inner = self.inner();
        if !inner.members.iter().any(|m| m.uuid == member.uuid) {
            inner.members.push(member);
        }
    }

    /// Remove a member. If it was the master, mastership is left unset.
    pub fn remove_member(&self, uuid: Uuid) -> Option<Member> {
        let mut inner = self.inner();
        let index = inner.members.iter().position(|m| m.uuid == uuid)?;
        if inner.master == Some(uuid) {
            inner.master = None;
        }
        inner.reported.remove(&uuid);
        inner.unreachable.remove(&uuid);
        Some(inner.members.remove(index))
    }

    pub fn set_master(&self, master: Option<Uuid>) {
        self.inner().master = master;
    }

    pub fn set_cluster_state(&self, state: ClusterState) {
        self.inner().state = state;
    }

    /// Make one member report a different cluster state than the local one.
    pub fn set_reported_state(&self, uuid: Uuid, state: Option<ClusterState>) {
        let mut inner = self.inner();
        match state {
            Some(state) => inner.reported.insert(uuid, state),
            None => inner.reported.remove(&uuid),
        };
    }

    /// Unreachable members never answer metadata requests.
    pub fn set_unreachable(&self, uuid: Uuid, unreachable: bool) {
        let mut inner = self.inner();
        if unreachable {
            inner.unreachable.insert(uuid);
        } else {
            inner.unreachable.remove(&uuid);
        }
    }

    pub fn set_partition_status(&self, status: PartitionStatus) {
        self.inner().partitions = status;
    }

    pub fn set_partition_count(&self, count: usize) {
        self.inner().partition_count = count;
    }

    pub fn set_running(&self, running: bool) {
        self.inner().running = running;
    }
}

#[async_trait]
impl ClusterView for LocalCluster {
    fn local_member(&self) -> Member {
        self.inner().local.clone()
    }

    fn master(&self) -> Option<Uuid> {
        self.inner().master
    }

    fn is_running(&self) -> bool {
        self.inner().running
    }

    fn members(&self) -> Vec<Member> {
        self.inner().members.clone()
    }

    fn cluster_state(&self) -> ClusterState {
        self.inner().state
    }

    fn partition_status(&self) -> PartitionStatus {
        self.inner().partitions
    }

    fn partition_count(&self) -> usize {
        self.inner().partition_count
    }

    async fn fetch_metadata(&self, member: &Member) -> Result<ClusterMetadata, ExecutionError> {
        let reply = {
            let mut inner = self.inner();
            inner.metadata_requests += 1;
            if !inner.members.iter().any(|m| m.uuid == member.uuid) {
                return Err(ExecutionError::TargetNotMember(member.uuid));
            }
            if inner.unreachable.contains(&member.uuid) {
                None
            } else {
                Some(ClusterMetadata {
                    member: member.uuid,
                    state: inner.reported.get(&member.uuid).copied().unwrap_or(inner.state),
                })
            }
        };
        match reply {
            Some(metadata) => Ok(metadata),
            None => std::future::pending().await,
        }
    }
}
