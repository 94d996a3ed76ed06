use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    NotRunning,
    Starting,
    Running,
    Suspended,
    Completing,
    Failed,
    Completed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Completed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::NotRunning => write!(f, "not_running"),
            JobStatus::Starting => write!(f, "starting"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Suspended => write!(f, "suspended"),
            JobStatus::Completing => write!(f, "completing"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Completed => write!(f, "completed"),
        }
    }
}

/// What happens to the job once the current execution has unwound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationAction {
    Restart,
    Suspend,
    Cancel,
}

/// A requested way of terminating the current execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminationMode {
    CancelForceful,
    CancelGraceful,
    RestartForceful,
    RestartGraceful,
    SuspendGraceful,
}

impl TerminationMode {
    /// Graceful modes let the execution take a final snapshot before unwinding.
    pub fn is_graceful(&self) -> bool {
        matches!(
            self,
            TerminationMode::CancelGraceful
                | TerminationMode::RestartGraceful
                | TerminationMode::SuspendGraceful
        )
    }

    pub fn action(&self) -> TerminationAction {
        match self {
            TerminationMode::CancelForceful | TerminationMode::CancelGraceful => {
                TerminationAction::Cancel
            }
            TerminationMode::RestartForceful | TerminationMode::RestartGraceful => {
                TerminationAction::Restart
            }
            TerminationMode::SuspendGraceful => TerminationAction::Suspend,
        }
    }

    pub fn is_cancel(&self) -> bool {
        self.action() == TerminationAction::Cancel
    }
}

impl fmt::Display for TerminationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationMode::CancelForceful => write!(f, "cancel_forceful"),
            TerminationMode::CancelGraceful => write!(f, "cancel_graceful"),
            TerminationMode::RestartForceful => write!(f, "restart_forceful"),
            TerminationMode::RestartGraceful => write!(f, "restart_graceful"),
            TerminationMode::SuspendGraceful => write!(f, "suspend_graceful"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingGuarantee {
    None,
    AtLeastOnce,
    ExactlyOnce,
}
