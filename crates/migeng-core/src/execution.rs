//! Step and init executions, unified behind the [`Execution`] trait.
//!
//! Spec §9 notes that step and init executions share almost every field and
//! lifecycle rule, and suggests a sum type over the source's boolean
//! `isInitStep` flag. We model that as two concrete structs plus a trait
//! the progression service and result processor program against, following
//! how `durable::workflow::event::WorkflowEvent` uses one tagged enum for
//! heterogeneous event variants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::status::StepStatus;

/// Distinguishes a step execution (scoped to a phase + member) from an init
/// execution (scoped to a batch only, sequential).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionKind {
    Step {
        phase_execution_id: Uuid,
        batch_member_id: Uuid,
    },
    Init {
        batch_id: Uuid,
    },
}

impl ExecutionKind {
    pub fn is_init(&self) -> bool {
        matches!(self, ExecutionKind::Init { .. })
    }
}

/// Polling configuration and live poll state for a long-running step.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PollState {
    pub is_poll_step: bool,
    pub poll_interval_sec: u64,
    pub poll_timeout_sec: u64,
    pub poll_started_at: Option<DateTime<Utc>>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub poll_count: u32,
}

/// Retry configuration and live retry state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryState {
    pub max_retries: u32,
    pub retry_interval_sec: u64,
    pub retry_count: u32,
    pub retry_after: Option<DateTime<Utc>>,
}

impl RetryState {
    pub fn has_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// One (member x step) execution instance under a phase execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub phase_execution_id: Uuid,
    pub batch_member_id: Uuid,
    pub step_name: String,
    pub step_index: u32,
    pub runbook_version: i32,
    pub worker_id: String,
    pub function_name: String,
    pub params_json: Value,
    pub status: StepStatus,
    pub job_id: Option<String>,
    pub result_json: Option<Value>,
    pub error_message: Option<String>,
    pub output_params: std::collections::HashMap<String, String>,
    pub on_failure: Option<String>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub poll: PollState,
    pub retry: RetryState,
}

/// Batch-scoped, member-less execution run sequentially before any phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitExecution {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub step_name: String,
    pub step_index: u32,
    pub runbook_version: i32,
    pub worker_id: String,
    pub function_name: String,
    pub params_json: Value,
    pub status: StepStatus,
    pub job_id: Option<String>,
    pub result_json: Option<Value>,
    pub error_message: Option<String>,
    pub output_params: std::collections::HashMap<String, String>,
    pub on_failure: Option<String>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub poll: PollState,
    pub retry: RetryState,
}

/// Common surface the progression service and result processor drive,
/// regardless of whether the underlying row is a step or init execution.
pub trait Execution {
    fn id(&self) -> Uuid;
    fn kind(&self) -> ExecutionKind;
    fn step_index(&self) -> u32;
    fn status(&self) -> StepStatus;
    fn job_id(&self) -> Option<&str>;
    fn retry(&self) -> &RetryState;
    fn poll(&self) -> &PollState;
    fn output_params(&self) -> &std::collections::HashMap<String, String>;
    fn on_failure(&self) -> Option<&str>;
}

impl Execution for StepExecution {
    fn id(&self) -> Uuid {
        self.id
    }
    fn kind(&self) -> ExecutionKind {
        ExecutionKind::Step {
            phase_execution_id: self.phase_execution_id,
            batch_member_id: self.batch_member_id,
        }
    }
    fn step_index(&self) -> u32 {
        self.step_index
    }
    fn status(&self) -> StepStatus {
        self.status
    }
    fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }
    fn retry(&self) -> &RetryState {
        &self.retry
    }
    fn poll(&self) -> &PollState {
        &self.poll
    }
    fn output_params(&self) -> &std::collections::HashMap<String, String> {
        &self.output_params
    }
    fn on_failure(&self) -> Option<&str> {
        self.on_failure.as_deref()
    }
}

impl Execution for InitExecution {
    fn id(&self) -> Uuid {
        self.id
    }
    fn kind(&self) -> ExecutionKind {
        ExecutionKind::Init {
            batch_id: self.batch_id,
        }
    }
    fn step_index(&self) -> u32 {
        self.step_index
    }
    fn status(&self) -> StepStatus {
        self.status
    }
    fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }
    fn retry(&self) -> &RetryState {
        &self.retry
    }
    fn poll(&self) -> &PollState {
        &self.poll
    }
    fn output_params(&self) -> &std::collections::HashMap<String, String> {
        &self.output_params
    }
    fn on_failure(&self) -> Option<&str> {
        self.on_failure.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_budget_exhausts_at_max() {
        let retry = RetryState {
            max_retries: 2,
            retry_interval_sec: 60,
            retry_count: 2,
            retry_after: None,
        };
        assert!(!retry.has_budget());
    }
}
