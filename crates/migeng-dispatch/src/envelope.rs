//! Job/Result envelopes exchanged with worker pools. Worker pools
//! themselves are out of scope; this crate only defines the wire shapes
//! and the bus abstraction workers are expected to speak against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies the execution a job or result belongs to without requiring a
/// dependency on the store crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExecutionHandle {
    Step { execution_id: Uuid },
    Init { execution_id: Uuid },
}

impl ExecutionHandle {
    pub fn execution_id(self) -> Uuid {
        match self {
            ExecutionHandle::Step { execution_id } => execution_id,
            ExecutionHandle::Init { execution_id } => execution_id,
        }
    }
}

/// Dispatched to a worker pool to execute one runbook step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    /// Correlation id, e.g. `step-{execution_id}`, `step-{execution_id}-poll-{count}`,
    /// or `step-{execution_id}-retry-{retry_count}` — mirrors the execution row's
    /// own `job_id` field so results can be matched back without a lookup table.
    pub job_id: String,
    pub execution: ExecutionHandle,
    pub worker_id: String,
    pub function_name: String,
    pub params: serde_json::Value,
    pub dispatched_at: DateTime<Utc>,
}

/// Outcome a worker reports back for a dispatched job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum JobOutcome {
    Succeeded { result: serde_json::Value },
    Failed { error: String },
    /// The job is long-running and has not finished; the poll clock should
    /// keep checking it rather than treating this as dispatched-but-silent.
    StillRunning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    pub job_id: String,
    pub execution: ExecutionHandle,
    pub outcome: JobOutcome,
    pub reported_at: DateTime<Utc>,
}
