//! `MigrationStore`: the single shared-state abstraction behind the
//! scheduler and orchestrator (spec §5 — "the store is the only shared
//! state"). Modeled on `durable::persistence::store::WorkflowEventStore`:
//! one trait, multiple backends, guarded updates expressed as `bool`
//! return values rather than exceptions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migeng_core::{Batch, BatchMember, BatchStatus, PhaseExecution, Runbook};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{
    ExecutionRecord, ExecutionRef, NewBatch, NewInitExecution, NewPhaseExecution,
    NewStepExecution, RunbookLockGuard, TerminalOutcome,
};
use migeng_core::{InitExecution, StepExecution};

#[async_trait]
pub trait MigrationStore: Send + Sync + 'static {
    // ---------------------------------------------------------------
    // Runbooks
    // ---------------------------------------------------------------

    async fn list_active_runbooks(&self) -> Result<Vec<Runbook>, StoreError>;
    async fn get_runbook(&self, id: Uuid) -> Result<Runbook, StoreError>;
    async fn record_runbook_error(&self, id: Uuid, message: &str) -> Result<(), StoreError>;

    /// Non-blocking advisory lock, held for the duration of one scheduler
    /// tick for this runbook. Returns `None` if already locked.
    async fn try_lock_runbook(
        &self,
        id: Uuid,
    ) -> Result<Option<Box<dyn RunbookLockGuard>>, StoreError>;

    // ---------------------------------------------------------------
    // Batches
    // ---------------------------------------------------------------

    async fn find_batch(
        &self,
        runbook_id: Uuid,
        batch_start_time: DateTime<Utc>,
    ) -> Result<Option<Batch>, StoreError>;

    async fn get_batch(&self, id: Uuid) -> Result<Batch, StoreError>;

    async fn create_batch(&self, new: NewBatch) -> Result<Batch, StoreError>;

    async fn set_batch_status(&self, id: Uuid, status: BatchStatus) -> Result<(), StoreError>;

    /// Every batch for this runbook not yet in a terminal status.
    async fn list_nonterminal_batches(&self, runbook_id: Uuid) -> Result<Vec<Batch>, StoreError>;

    /// Guarded: only succeeds if every phase execution for this batch is
    /// terminal. Returns `false` (not an error) if another caller already
    /// completed it, or if phases remain non-terminal.
    async fn complete_batch_if_ready(
        &self,
        batch_id: Uuid,
        outcome: TerminalOutcome,
    ) -> Result<bool, StoreError>;

    // ---------------------------------------------------------------
    // Batch members
    // ---------------------------------------------------------------

    async fn get_member(&self, id: Uuid) -> Result<BatchMember, StoreError>;
    async fn list_members(&self, batch_id: Uuid) -> Result<Vec<BatchMember>, StoreError>;
    async fn list_active_members(&self, batch_id: Uuid) -> Result<Vec<BatchMember>, StoreError>;

    async fn find_member_by_key(
        &self,
        batch_id: Uuid,
        member_key: &str,
    ) -> Result<Option<BatchMember>, StoreError>;

    /// A member key is in exactly one non-terminal batch per runbook at a
    /// time (invariant I2) — used by the scheduler's immediate-batch
    /// membership filter.
    async fn find_active_membership(
        &self,
        runbook_id: Uuid,
        member_key: &str,
    ) -> Result<Option<(Uuid, Uuid)>, StoreError>;

    async fn insert_member(
        &self,
        batch_id: Uuid,
        member_key: &str,
        data_json: serde_json::Value,
    ) -> Result<BatchMember, StoreError>;

    async fn mark_member_removed(&self, id: Uuid) -> Result<(), StoreError>;
    async fn mark_member_failed(&self, id: Uuid) -> Result<(), StoreError>;

    /// Monotonic merge into `worker_data_json` (the authoritative merging
    /// variant — see SPEC_FULL.md §9 Open Questions).
    async fn merge_member_worker_data(
        &self,
        id: Uuid,
        updates: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), StoreError>;

    // ---------------------------------------------------------------
    // Phase executions
    // ---------------------------------------------------------------

    async fn create_phase_execution(
        &self,
        new: NewPhaseExecution,
    ) -> Result<PhaseExecution, StoreError>;

    async fn get_phase_execution(&self, id: Uuid) -> Result<PhaseExecution, StoreError>;

    async fn list_phase_executions(&self, batch_id: Uuid) -> Result<Vec<PhaseExecution>, StoreError>;

    /// Pending phases whose `due_at <= now`, ascending by `offset_minutes`.
    async fn list_due_phases(
        &self,
        batch_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<PhaseExecution>, StoreError>;

    async fn set_phase_dispatched(&self, id: Uuid) -> Result<(), StoreError>;
    async fn set_phase_skipped(&self, id: Uuid) -> Result<(), StoreError>;

    /// Guarded `WHERE status='dispatched'` update; `false` if another
    /// concurrent call already transitioned the phase.
    async fn complete_phase_if_dispatched(
        &self,
        id: Uuid,
        outcome: TerminalOutcome,
    ) -> Result<bool, StoreError>;

    // ---------------------------------------------------------------
    // Step executions
    // ---------------------------------------------------------------

    async fn create_step_execution(
        &self,
        new: NewStepExecution,
    ) -> Result<StepExecution, StoreError>;

    async fn find_step_execution(
        &self,
        phase_execution_id: Uuid,
        batch_member_id: Uuid,
        step_index: u32,
    ) -> Result<Option<StepExecution>, StoreError>;

    async fn list_step_executions_for_phase(
        &self,
        phase_execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError>;

    async fn list_step_executions_for_member(
        &self,
        batch_member_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError>;

    /// First `pending` step for a member within a phase, ordered by
    /// `step_index`.
    async fn first_pending_step_for_member(
        &self,
        phase_execution_id: Uuid,
        batch_member_id: Uuid,
    ) -> Result<Option<StepExecution>, StoreError>;

    // ---------------------------------------------------------------
    // Init executions
    // ---------------------------------------------------------------

    async fn create_init_execution(
        &self,
        new: NewInitExecution,
    ) -> Result<InitExecution, StoreError>;

    async fn find_init_execution(
        &self,
        batch_id: Uuid,
        runbook_version: i32,
        step_name: &str,
        step_index: u32,
    ) -> Result<Option<InitExecution>, StoreError>;

    async fn list_init_executions(&self, batch_id: Uuid) -> Result<Vec<InitExecution>, StoreError>;

    async fn first_pending_init(&self, batch_id: Uuid) -> Result<Option<InitExecution>, StoreError>;

    // ---------------------------------------------------------------
    // Executions (step or init), unified operations
    // ---------------------------------------------------------------

    async fn get_execution(&self, r: ExecutionRef) -> Result<ExecutionRecord, StoreError>;

    async fn set_execution_dispatched(
        &self,
        r: ExecutionRef,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn set_execution_succeeded(
        &self,
        r: ExecutionRef,
        result_json: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn set_execution_polling(
        &self,
        r: ExecutionRef,
        poll_started_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn update_execution_poll(
        &self,
        r: ExecutionRef,
        last_polled_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn set_execution_poll_timeout(&self, r: ExecutionRef) -> Result<(), StoreError>;

    async fn set_execution_retry_pending(
        &self,
        r: ExecutionRef,
        retry_after: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn set_execution_failed(
        &self,
        r: ExecutionRef,
        error_message: &str,
    ) -> Result<(), StoreError>;

    /// Cancels the execution only if it is currently non-terminal; a no-op
    /// (not an error) if it has already reached a terminal status.
    async fn cancel_execution_if_nonterminal(&self, r: ExecutionRef) -> Result<bool, StoreError>;

    /// Every non-terminal step execution for a member, across all phases
    /// of its batch — used by `HandleMemberFailure`.
    async fn cancel_all_nonterminal_for_member(
        &self,
        batch_member_id: Uuid,
    ) -> Result<Vec<ExecutionRef>, StoreError>;

    /// Executions in `polling` whose `last_polled_at + poll_interval_sec
    /// <= now`.
    async fn list_pollable_executions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRef>, StoreError>;

    /// Executions `pending` with `retry_count > 0` and `retry_after <=
    /// now`.
    async fn list_retryable_executions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRef>, StoreError>;
}
