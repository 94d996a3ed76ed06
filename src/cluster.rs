//! Cluster membership as seen by the coordinator.
//!
//! The membership layer itself (failure detection, master election,
//! partition table) lives outside this crate. [`ClusterView`] is the
//! narrow read-only surface the coordinator needs from it.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ExecutionError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    pub uuid: Uuid,
    pub address: String,
    /// Lite members hold no partitions and never run job tasks.
    pub lite: bool,
}

impl Member {
    pub fn data(address: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            address: address.into(),
            lite: false,
        }
    }

    pub fn lite(address: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            address: address.into(),
            lite: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterState {
    Active,
    NoMigration,
    Frozen,
    Passive,
    InTransition,
}

impl ClusterState {
    /// Jobs are never started in passive or transitional states.
    pub fn allows_jobs(&self) -> bool {
        !matches!(self, ClusterState::Passive | ClusterState::InTransition)
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterState::Active => write!(f, "active"),
            ClusterState::NoMigration => write!(f, "no_migration"),
            ClusterState::Frozen => write!(f, "frozen"),
            ClusterState::Passive => write!(f, "passive"),
            ClusterState::InTransition => write!(f, "in_transition"),
        }
    }
}

/// Point-in-time metadata reported by a remote member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMetadata {
    pub member: Uuid,
    pub state: ClusterState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStatus {
    pub initialized: bool,
    pub migrations_allowed: bool,
    pub migration_in_flight: bool,
}

impl PartitionStatus {
    pub fn settled() -> Self {
        Self {
            initialized: true,
            migrations_allowed: true,
            migration_in_flight: false,
        }
    }

    /// Partition table is usable and no data is moving.
    pub fn is_settled(&self) -> bool {
        self.initialized && self.migrations_allowed && !self.migration_in_flight
    }
}

#[async_trait]
pub trait ClusterView: Send + Sync {
    fn local_member(&self) -> Member;

    fn master(&self) -> Option<Uuid>;

    fn is_master(&self) -> bool {
        self.master() == Some(self.local_member().uuid)
    }

    /// Whether the local node is up and operational.
    fn is_running(&self) -> bool;

    fn members(&self) -> Vec<Member>;

    fn data_members(&self) -> Vec<Member> {
        self.members().into_iter().filter(|m| !m.lite).collect()
    }

    fn cluster_state(&self) -> ClusterState;

    fn partition_status(&self) -> PartitionStatus;

    fn partition_count(&self) -> usize;

    /// Ask a remote member for its view of the cluster.
    async fn fetch_metadata(&self, member: &Member) -> Result<ClusterMetadata, ExecutionError>;
}
