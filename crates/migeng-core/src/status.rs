//! Status enums for every entity's state machine.

use serde::{Deserialize, Serialize};

/// Batch lifecycle: `detected` -> `init_dispatched`|`active` -> `completed`|`failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Detected,
    InitDispatched,
    Active,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Detected => "detected",
            Self::InitDispatched => "init_dispatched",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Batch member lifecycle: `active` -> `removed`|`failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Removed,
    Failed,
}

impl MemberStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Removed | Self::Failed)
    }
}

/// Phase execution lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Dispatched,
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Step/init execution lifecycle. See spec §4.6 for the transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Dispatched,
    Succeeded,
    Failed,
    Polling,
    PollTimeout,
    Cancelled,
}

impl StepStatus {
    /// A terminal step never transitions out (invariant I6).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Cancelled | Self::PollTimeout | Self::Failed
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Polling => "polling",
            Self::PollTimeout => "poll_timeout",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Runbook-level policy for phases whose `due_at` has already passed at
/// batch detection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverdueBehavior {
    Rerun,
    Ignore,
}
