//! Supporting types for store operations that don't belong on the
//! persisted entities themselves (constructors, lock guards, references).

use chrono::{DateTime, Utc};
use migeng_core::{
    execution::{Execution, ExecutionKind, PollState, RetryState},
    BatchStatus, InitExecution, PhaseStatus, StepExecution, StepStatus,
};
use serde_json::Value;
use uuid::Uuid;

/// Input to create a new step execution.
#[derive(Debug, Clone)]
pub struct NewStepExecution {
    pub phase_execution_id: Uuid,
    pub batch_member_id: Uuid,
    pub step_name: String,
    pub step_index: u32,
    pub runbook_version: i32,
    pub worker_id: String,
    pub function_name: String,
    pub params_json: Value,
    pub output_params: std::collections::HashMap<String, String>,
    pub on_failure: Option<String>,
    pub poll: PollState,
    pub retry: RetryState,
}

/// Input to create a new init execution.
#[derive(Debug, Clone)]
pub struct NewInitExecution {
    pub batch_id: Uuid,
    pub step_name: String,
    pub step_index: u32,
    pub runbook_version: i32,
    pub worker_id: String,
    pub function_name: String,
    pub params_json: Value,
    pub output_params: std::collections::HashMap<String, String>,
    pub on_failure: Option<String>,
    pub poll: PollState,
    pub retry: RetryState,
}

#[derive(Debug, Clone)]
pub struct NewBatch {
    pub runbook_id: Uuid,
    pub batch_start_time: DateTime<Utc>,
    pub is_manual: bool,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPhaseExecution {
    pub batch_id: Uuid,
    pub phase_name: String,
    pub offset_minutes: i64,
    pub due_at: DateTime<Utc>,
    pub runbook_version: i32,
}

/// A reference to either a step or init execution, used by the methods
/// shared across both (poll/retry clocks, result processing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionRef {
    Step(Uuid),
    Init(Uuid),
}

impl ExecutionRef {
    pub fn id(self) -> Uuid {
        match self {
            ExecutionRef::Step(id) => id,
            ExecutionRef::Init(id) => id,
        }
    }

    pub fn is_init(self) -> bool {
        matches!(self, ExecutionRef::Init(_))
    }
}

/// The row fetched for an [`ExecutionRef`] — a step or init execution,
/// unified behind the `Execution` trait (see `migeng_core::execution`).
#[derive(Debug, Clone)]
pub enum ExecutionRecord {
    Step(StepExecution),
    Init(InitExecution),
}

impl ExecutionRecord {
    pub fn as_ref(&self) -> ExecutionRef {
        match self {
            ExecutionRecord::Step(s) => ExecutionRef::Step(s.id),
            ExecutionRecord::Init(i) => ExecutionRef::Init(i.id),
        }
    }
}

impl Execution for ExecutionRecord {
    fn id(&self) -> Uuid {
        match self {
            ExecutionRecord::Step(s) => s.id,
            ExecutionRecord::Init(i) => i.id,
        }
    }
    fn kind(&self) -> ExecutionKind {
        match self {
            ExecutionRecord::Step(s) => s.kind(),
            ExecutionRecord::Init(i) => i.kind(),
        }
    }
    fn step_index(&self) -> u32 {
        match self {
            ExecutionRecord::Step(s) => s.step_index,
            ExecutionRecord::Init(i) => i.step_index,
        }
    }
    fn status(&self) -> StepStatus {
        match self {
            ExecutionRecord::Step(s) => s.status,
            ExecutionRecord::Init(i) => i.status,
        }
    }
    fn job_id(&self) -> Option<&str> {
        match self {
            ExecutionRecord::Step(s) => s.job_id.as_deref(),
            ExecutionRecord::Init(i) => i.job_id.as_deref(),
        }
    }
    fn retry(&self) -> &RetryState {
        match self {
            ExecutionRecord::Step(s) => &s.retry,
            ExecutionRecord::Init(i) => &i.retry,
        }
    }
    fn poll(&self) -> &PollState {
        match self {
            ExecutionRecord::Step(s) => &s.poll,
            ExecutionRecord::Init(i) => &i.poll,
        }
    }
    fn output_params(&self) -> &std::collections::HashMap<String, String> {
        match self {
            ExecutionRecord::Step(s) => &s.output_params,
            ExecutionRecord::Init(i) => &i.output_params,
        }
    }
    fn on_failure(&self) -> Option<&str> {
        match self {
            ExecutionRecord::Step(s) => s.on_failure.as_deref(),
            ExecutionRecord::Init(i) => i.on_failure.as_deref(),
        }
    }
}

/// Outcome recorded when a phase or batch's terminal status is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    Completed,
    Failed,
}

impl TerminalOutcome {
    pub fn as_phase_status(self) -> PhaseStatus {
        match self {
            TerminalOutcome::Completed => PhaseStatus::Completed,
            TerminalOutcome::Failed => PhaseStatus::Failed,
        }
    }

    pub fn as_batch_status(self) -> BatchStatus {
        match self {
            TerminalOutcome::Completed => BatchStatus::Completed,
            TerminalOutcome::Failed => BatchStatus::Failed,
        }
    }
}

/// RAII guard for the per-runbook advisory lock the scheduler takes for the
/// duration of one tick (spec §4.2's "single tick may execute at once").
/// Dropping the guard releases the lock.
pub trait RunbookLockGuard: Send + Sync {
    fn runbook_id(&self) -> Uuid;
}
