//! In-memory `MigrationStore`, for tests and local development — mirrors
//! `durable::persistence::memory::InMemoryWorkflowEventStore`'s approach of
//! `parking_lot::RwLock<HashMap<..>>` with the same semantics as the
//! Postgres-backed store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use migeng_core::{
    Batch, BatchMember, BatchStatus, InitExecution, MemberStatus, PhaseExecution, PhaseStatus,
    Runbook, StepExecution, StepStatus,
};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::MigrationStore;
use crate::types::{
    ExecutionRecord, ExecutionRef, NewBatch, NewInitExecution, NewPhaseExecution,
    NewStepExecution, RunbookLockGuard, TerminalOutcome,
};

struct MemoryLockGuard {
    runbook_id: Uuid,
    locks: Arc<DashMap<Uuid, ()>>,
}

impl RunbookLockGuard for MemoryLockGuard {
    fn runbook_id(&self) -> Uuid {
        self.runbook_id
    }
}

impl Drop for MemoryLockGuard {
    fn drop(&mut self) {
        self.locks.remove(&self.runbook_id);
    }
}

#[derive(Default)]
pub struct InMemoryMigrationStore {
    runbooks: RwLock<HashMap<Uuid, Runbook>>,
    batches: RwLock<HashMap<Uuid, Batch>>,
    members: RwLock<HashMap<Uuid, BatchMember>>,
    phase_executions: RwLock<HashMap<Uuid, PhaseExecution>>,
    step_executions: RwLock<HashMap<Uuid, StepExecution>>,
    init_executions: RwLock<HashMap<Uuid, InitExecution>>,
    locks: Arc<DashMap<Uuid, ()>>,
}

impl InMemoryMigrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/bootstrap helper: seed a runbook directly.
    pub fn insert_runbook(&self, runbook: Runbook) {
        self.runbooks.write().insert(runbook.id, runbook);
    }
}

#[async_trait]
impl MigrationStore for InMemoryMigrationStore {
    async fn list_active_runbooks(&self) -> Result<Vec<Runbook>, StoreError> {
        Ok(self
            .runbooks
            .read()
            .values()
            .filter(|r| r.is_active)
            .cloned()
            .collect())
    }

    async fn get_runbook(&self, id: Uuid) -> Result<Runbook, StoreError> {
        self.runbooks
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::RunbookNotFound(id))
    }

    async fn record_runbook_error(&self, id: Uuid, message: &str) -> Result<(), StoreError> {
        let mut runbooks = self.runbooks.write();
        let rb = runbooks.get_mut(&id).ok_or(StoreError::RunbookNotFound(id))?;
        rb.last_error = Some(message.to_string());
        Ok(())
    }

    async fn try_lock_runbook(
        &self,
        id: Uuid,
    ) -> Result<Option<Box<dyn RunbookLockGuard>>, StoreError> {
        if self.locks.insert(id, ()).is_some() {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryLockGuard {
            runbook_id: id,
            locks: self.locks.clone(),
        })))
    }

    async fn find_batch(
        &self,
        runbook_id: Uuid,
        batch_start_time: DateTime<Utc>,
    ) -> Result<Option<Batch>, StoreError> {
        Ok(self
            .batches
            .read()
            .values()
            .find(|b| b.runbook_id == runbook_id && b.batch_start_time == batch_start_time)
            .cloned())
    }

    async fn get_batch(&self, id: Uuid) -> Result<Batch, StoreError> {
        self.batches
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::BatchNotFound(id))
    }

    async fn create_batch(&self, new: NewBatch) -> Result<Batch, StoreError> {
        let batch = Batch {
            id: Uuid::now_v7(),
            runbook_id: new.runbook_id,
            batch_start_time: new.batch_start_time,
            status: BatchStatus::Detected,
            is_manual: new.is_manual,
            created_by: new.created_by,
            current_phase: None,
            detected_at: Utc::now(),
            init_dispatched_at: None,
        };
        self.batches.write().insert(batch.id, batch.clone());
        Ok(batch)
    }

    async fn set_batch_status(&self, id: Uuid, status: BatchStatus) -> Result<(), StoreError> {
        let mut batches = self.batches.write();
        let batch = batches.get_mut(&id).ok_or(StoreError::BatchNotFound(id))?;
        batch.status = status;
        if status == BatchStatus::InitDispatched {
            batch.init_dispatched_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_nonterminal_batches(&self, runbook_id: Uuid) -> Result<Vec<Batch>, StoreError> {
        Ok(self
            .batches
            .read()
            .values()
            .filter(|b| b.runbook_id == runbook_id && !b.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn complete_batch_if_ready(
        &self,
        batch_id: Uuid,
        outcome: TerminalOutcome,
    ) -> Result<bool, StoreError> {
        let phases_terminal = self
            .phase_executions
            .read()
            .values()
            .filter(|p| p.batch_id == batch_id)
            .all(|p| p.status.is_terminal());
        if !phases_terminal {
            return Ok(false);
        }
        let mut batches = self.batches.write();
        let batch = batches.get_mut(&batch_id).ok_or(StoreError::BatchNotFound(batch_id))?;
        if batch.status.is_terminal() {
            return Ok(false);
        }
        batch.status = outcome.as_batch_status();
        Ok(true)
    }

    async fn get_member(&self, id: Uuid) -> Result<BatchMember, StoreError> {
        self.members
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::MemberNotFound(id))
    }

    async fn list_members(&self, batch_id: Uuid) -> Result<Vec<BatchMember>, StoreError> {
        Ok(self
            .members
            .read()
            .values()
            .filter(|m| m.batch_id == batch_id)
            .cloned()
            .collect())
    }

    async fn list_active_members(&self, batch_id: Uuid) -> Result<Vec<BatchMember>, StoreError> {
        Ok(self
            .members
            .read()
            .values()
            .filter(|m| m.batch_id == batch_id && m.status == MemberStatus::Active)
            .cloned()
            .collect())
    }

    async fn find_member_by_key(
        &self,
        batch_id: Uuid,
        member_key: &str,
    ) -> Result<Option<BatchMember>, StoreError> {
        Ok(self
            .members
            .read()
            .values()
            .find(|m| m.batch_id == batch_id && m.member_key == member_key)
            .cloned())
    }

    async fn find_active_membership(
        &self,
        runbook_id: Uuid,
        member_key: &str,
    ) -> Result<Option<(Uuid, Uuid)>, StoreError> {
        let batches = self.batches.read();
        let members = self.members.read();
        for member in members.values() {
            if member.status != MemberStatus::Active || member.member_key != member_key {
                continue;
            }
            if let Some(batch) = batches.get(&member.batch_id) {
                if batch.runbook_id == runbook_id && !batch.status.is_terminal() {
                    return Ok(Some((batch.id, member.id)));
                }
            }
        }
        Ok(None)
    }

    async fn insert_member(
        &self,
        batch_id: Uuid,
        member_key: &str,
        data_json: serde_json::Value,
    ) -> Result<BatchMember, StoreError> {
        let member = BatchMember {
            id: Uuid::now_v7(),
            batch_id,
            member_key: member_key.to_string(),
            data_json,
            worker_data_json: serde_json::json!({}),
            status: MemberStatus::Active,
            added_at: Utc::now(),
            removed_at: None,
            failed_at: None,
            add_dispatched_at: None,
            remove_dispatched_at: None,
        };
        self.members.write().insert(member.id, member.clone());
        Ok(member)
    }

    async fn mark_member_removed(&self, id: Uuid) -> Result<(), StoreError> {
        let mut members = self.members.write();
        let m = members.get_mut(&id).ok_or(StoreError::MemberNotFound(id))?;
        m.status = MemberStatus::Removed;
        m.removed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_member_failed(&self, id: Uuid) -> Result<(), StoreError> {
        let mut members = self.members.write();
        let m = members.get_mut(&id).ok_or(StoreError::MemberNotFound(id))?;
        m.status = MemberStatus::Failed;
        m.failed_at = Some(Utc::now());
        Ok(())
    }

    async fn merge_member_worker_data(
        &self,
        id: Uuid,
        updates: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        let mut members = self.members.write();
        let m = members.get_mut(&id).ok_or(StoreError::MemberNotFound(id))?;
        m.merge_worker_data(updates);
        Ok(())
    }

    async fn create_phase_execution(
        &self,
        new: NewPhaseExecution,
    ) -> Result<PhaseExecution, StoreError> {
        let phase = PhaseExecution {
            id: Uuid::now_v7(),
            batch_id: new.batch_id,
            phase_name: new.phase_name,
            offset_minutes: new.offset_minutes,
            due_at: new.due_at,
            runbook_version: new.runbook_version,
            status: PhaseStatus::Pending,
            dispatched_at: None,
            completed_at: None,
        };
        self.phase_executions.write().insert(phase.id, phase.clone());
        Ok(phase)
    }

    async fn get_phase_execution(&self, id: Uuid) -> Result<PhaseExecution, StoreError> {
        self.phase_executions
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::PhaseExecutionNotFound(id))
    }

    async fn list_phase_executions(&self, batch_id: Uuid) -> Result<Vec<PhaseExecution>, StoreError> {
        Ok(self
            .phase_executions
            .read()
            .values()
            .filter(|p| p.batch_id == batch_id)
            .cloned()
            .collect())
    }

    async fn list_due_phases(
        &self,
        batch_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<PhaseExecution>, StoreError> {
        let mut due: Vec<PhaseExecution> = self
            .phase_executions
            .read()
            .values()
            .filter(|p| p.batch_id == batch_id && p.status == PhaseStatus::Pending && p.due_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|p| p.offset_minutes);
        Ok(due)
    }

    async fn set_phase_dispatched(&self, id: Uuid) -> Result<(), StoreError> {
        let mut phases = self.phase_executions.write();
        let p = phases.get_mut(&id).ok_or(StoreError::PhaseExecutionNotFound(id))?;
        p.status = PhaseStatus::Dispatched;
        p.dispatched_at = Some(Utc::now());
        Ok(())
    }

    async fn set_phase_skipped(&self, id: Uuid) -> Result<(), StoreError> {
        let mut phases = self.phase_executions.write();
        let p = phases.get_mut(&id).ok_or(StoreError::PhaseExecutionNotFound(id))?;
        p.status = PhaseStatus::Skipped;
        Ok(())
    }

    async fn complete_phase_if_dispatched(
        &self,
        id: Uuid,
        outcome: TerminalOutcome,
    ) -> Result<bool, StoreError> {
        let steps_terminal = self
            .step_executions
            .read()
            .values()
            .filter(|s| s.phase_execution_id == id)
            .all(|s| s.status.is_terminal());
        if !steps_terminal {
            return Ok(false);
        }
        let mut phases = self.phase_executions.write();
        let p = phases.get_mut(&id).ok_or(StoreError::PhaseExecutionNotFound(id))?;
        if p.status != PhaseStatus::Dispatched {
            return Ok(false);
        }
        p.status = outcome.as_phase_status();
        p.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn create_step_execution(
        &self,
        new: NewStepExecution,
    ) -> Result<StepExecution, StoreError> {
        let step = StepExecution {
            id: Uuid::now_v7(),
            phase_execution_id: new.phase_execution_id,
            batch_member_id: new.batch_member_id,
            step_name: new.step_name,
            step_index: new.step_index,
            runbook_version: new.runbook_version,
            worker_id: new.worker_id,
            function_name: new.function_name,
            params_json: new.params_json,
            status: StepStatus::Pending,
            job_id: None,
            result_json: None,
            error_message: None,
            output_params: new.output_params,
            on_failure: new.on_failure,
            dispatched_at: None,
            completed_at: None,
            poll: new.poll,
            retry: new.retry,
        };
        self.step_executions.write().insert(step.id, step.clone());
        Ok(step)
    }

    async fn find_step_execution(
        &self,
        phase_execution_id: Uuid,
        batch_member_id: Uuid,
        step_index: u32,
    ) -> Result<Option<StepExecution>, StoreError> {
        Ok(self
            .step_executions
            .read()
            .values()
            .find(|s| {
                s.phase_execution_id == phase_execution_id
                    && s.batch_member_id == batch_member_id
                    && s.step_index == step_index
            })
            .cloned())
    }

    async fn list_step_executions_for_phase(
        &self,
        phase_execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError> {
        Ok(self
            .step_executions
            .read()
            .values()
            .filter(|s| s.phase_execution_id == phase_execution_id)
            .cloned()
            .collect())
    }

    async fn list_step_executions_for_member(
        &self,
        batch_member_id: Uuid,
    ) -> Result<Vec<StepExecution>, StoreError> {
        Ok(self
            .step_executions
            .read()
            .values()
            .filter(|s| s.batch_member_id == batch_member_id)
            .cloned()
            .collect())
    }

    async fn first_pending_step_for_member(
        &self,
        phase_execution_id: Uuid,
        batch_member_id: Uuid,
    ) -> Result<Option<StepExecution>, StoreError> {
        Ok(self
            .step_executions
            .read()
            .values()
            .filter(|s| {
                s.phase_execution_id == phase_execution_id
                    && s.batch_member_id == batch_member_id
                    && s.status == StepStatus::Pending
            })
            .min_by_key(|s| s.step_index)
            .cloned())
    }

    async fn create_init_execution(
        &self,
        new: NewInitExecution,
    ) -> Result<InitExecution, StoreError> {
        let init = InitExecution {
            id: Uuid::now_v7(),
            batch_id: new.batch_id,
            step_name: new.step_name,
            step_index: new.step_index,
            runbook_version: new.runbook_version,
            worker_id: new.worker_id,
            function_name: new.function_name,
            params_json: new.params_json,
            status: StepStatus::Pending,
            job_id: None,
            result_json: None,
            error_message: None,
            output_params: new.output_params,
            on_failure: new.on_failure,
            dispatched_at: None,
            completed_at: None,
            poll: new.poll,
            retry: new.retry,
        };
        self.init_executions.write().insert(init.id, init.clone());
        Ok(init)
    }

    async fn find_init_execution(
        &self,
        batch_id: Uuid,
        runbook_version: i32,
        step_name: &str,
        step_index: u32,
    ) -> Result<Option<InitExecution>, StoreError> {
        Ok(self
            .init_executions
            .read()
            .values()
            .find(|i| {
                i.batch_id == batch_id
                    && i.runbook_version == runbook_version
                    && i.step_name == step_name
                    && i.step_index == step_index
            })
            .cloned())
    }

    async fn list_init_executions(&self, batch_id: Uuid) -> Result<Vec<InitExecution>, StoreError> {
        Ok(self
            .init_executions
            .read()
            .values()
            .filter(|i| i.batch_id == batch_id)
            .cloned()
            .collect())
    }

    async fn first_pending_init(&self, batch_id: Uuid) -> Result<Option<InitExecution>, StoreError> {
        Ok(self
            .init_executions
            .read()
            .values()
            .filter(|i| i.batch_id == batch_id && i.status == StepStatus::Pending)
            .min_by_key(|i| i.step_index)
            .cloned())
    }

    async fn get_execution(&self, r: ExecutionRef) -> Result<ExecutionRecord, StoreError> {
        match r {
            ExecutionRef::Step(id) => self
                .step_executions
                .read()
                .get(&id)
                .cloned()
                .map(ExecutionRecord::Step)
                .ok_or(StoreError::ExecutionNotFound(id)),
            ExecutionRef::Init(id) => self
                .init_executions
                .read()
                .get(&id)
                .cloned()
                .map(ExecutionRecord::Init)
                .ok_or(StoreError::ExecutionNotFound(id)),
        }
    }

    async fn set_execution_dispatched(
        &self,
        r: ExecutionRef,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match r {
            ExecutionRef::Step(id) => {
                let mut steps = self.step_executions.write();
                let s = steps.get_mut(&id).ok_or(StoreError::ExecutionNotFound(id))?;
                s.status = StepStatus::Dispatched;
                s.job_id = Some(job_id.to_string());
                s.dispatched_at = Some(now);
            }
            ExecutionRef::Init(id) => {
                let mut inits = self.init_executions.write();
                let i = inits.get_mut(&id).ok_or(StoreError::ExecutionNotFound(id))?;
                i.status = StepStatus::Dispatched;
                i.job_id = Some(job_id.to_string());
                i.dispatched_at = Some(now);
            }
        }
        Ok(())
    }

    async fn set_execution_succeeded(
        &self,
        r: ExecutionRef,
        result_json: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match r {
            ExecutionRef::Step(id) => {
                let mut steps = self.step_executions.write();
                let s = steps.get_mut(&id).ok_or(StoreError::ExecutionNotFound(id))?;
                s.status = StepStatus::Succeeded;
                s.result_json = Some(result_json);
                s.completed_at = Some(now);
            }
            ExecutionRef::Init(id) => {
                let mut inits = self.init_executions.write();
                let i = inits.get_mut(&id).ok_or(StoreError::ExecutionNotFound(id))?;
                i.status = StepStatus::Succeeded;
                i.result_json = Some(result_json);
                i.completed_at = Some(now);
            }
        }
        Ok(())
    }

    async fn set_execution_polling(
        &self,
        r: ExecutionRef,
        poll_started_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match r {
            ExecutionRef::Step(id) => {
                let mut steps = self.step_executions.write();
                let s = steps.get_mut(&id).ok_or(StoreError::ExecutionNotFound(id))?;
                s.status = StepStatus::Polling;
                if s.poll.poll_started_at.is_none() {
                    s.poll.poll_started_at = Some(poll_started_at);
                }
                s.poll.last_polled_at = Some(poll_started_at);
            }
            ExecutionRef::Init(id) => {
                let mut inits = self.init_executions.write();
                let i = inits.get_mut(&id).ok_or(StoreError::ExecutionNotFound(id))?;
                i.status = StepStatus::Polling;
                if i.poll.poll_started_at.is_none() {
                    i.poll.poll_started_at = Some(poll_started_at);
                }
                i.poll.last_polled_at = Some(poll_started_at);
            }
        }
        Ok(())
    }

    async fn update_execution_poll(
        &self,
        r: ExecutionRef,
        last_polled_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match r {
            ExecutionRef::Step(id) => {
                let mut steps = self.step_executions.write();
                let s = steps.get_mut(&id).ok_or(StoreError::ExecutionNotFound(id))?;
                s.poll.last_polled_at = Some(last_polled_at);
                s.poll.poll_count += 1;
            }
            ExecutionRef::Init(id) => {
                let mut inits = self.init_executions.write();
                let i = inits.get_mut(&id).ok_or(StoreError::ExecutionNotFound(id))?;
                i.poll.last_polled_at = Some(last_polled_at);
                i.poll.poll_count += 1;
            }
        }
        Ok(())
    }

    async fn set_execution_poll_timeout(&self, r: ExecutionRef) -> Result<(), StoreError> {
        match r {
            ExecutionRef::Step(id) => {
                let mut steps = self.step_executions.write();
                let s = steps.get_mut(&id).ok_or(StoreError::ExecutionNotFound(id))?;
                s.status = StepStatus::PollTimeout;
                s.completed_at = Some(Utc::now());
            }
            ExecutionRef::Init(id) => {
                let mut inits = self.init_executions.write();
                let i = inits.get_mut(&id).ok_or(StoreError::ExecutionNotFound(id))?;
                i.status = StepStatus::PollTimeout;
                i.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn set_execution_retry_pending(
        &self,
        r: ExecutionRef,
        retry_after: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match r {
            ExecutionRef::Step(id) => {
                let mut steps = self.step_executions.write();
                let s = steps.get_mut(&id).ok_or(StoreError::ExecutionNotFound(id))?;
                s.status = StepStatus::Pending;
                s.retry.retry_count += 1;
                s.retry.retry_after = Some(retry_after);
                s.job_id = None;
                s.completed_at = None;
            }
            ExecutionRef::Init(id) => {
                let mut inits = self.init_executions.write();
                let i = inits.get_mut(&id).ok_or(StoreError::ExecutionNotFound(id))?;
                i.status = StepStatus::Pending;
                i.retry.retry_count += 1;
                i.retry.retry_after = Some(retry_after);
                i.job_id = None;
                i.completed_at = None;
            }
        }
        Ok(())
    }

    async fn set_execution_failed(
        &self,
        r: ExecutionRef,
        error_message: &str,
    ) -> Result<(), StoreError> {
        match r {
            ExecutionRef::Step(id) => {
                let mut steps = self.step_executions.write();
                let s = steps.get_mut(&id).ok_or(StoreError::ExecutionNotFound(id))?;
                s.status = StepStatus::Failed;
                s.error_message = Some(error_message.to_string());
                s.completed_at = Some(Utc::now());
            }
            ExecutionRef::Init(id) => {
                let mut inits = self.init_executions.write();
                let i = inits.get_mut(&id).ok_or(StoreError::ExecutionNotFound(id))?;
                i.status = StepStatus::Failed;
                i.error_message = Some(error_message.to_string());
                i.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn cancel_execution_if_nonterminal(&self, r: ExecutionRef) -> Result<bool, StoreError> {
        match r {
            ExecutionRef::Step(id) => {
                let mut steps = self.step_executions.write();
                let s = steps.get_mut(&id).ok_or(StoreError::ExecutionNotFound(id))?;
                if s.status.is_terminal() {
                    return Ok(false);
                }
                s.status = StepStatus::Cancelled;
                s.completed_at = Some(Utc::now());
                Ok(true)
            }
            ExecutionRef::Init(id) => {
                let mut inits = self.init_executions.write();
                let i = inits.get_mut(&id).ok_or(StoreError::ExecutionNotFound(id))?;
                if i.status.is_terminal() {
                    return Ok(false);
                }
                i.status = StepStatus::Cancelled;
                i.completed_at = Some(Utc::now());
                Ok(true)
            }
        }
    }

    async fn cancel_all_nonterminal_for_member(
        &self,
        batch_member_id: Uuid,
    ) -> Result<Vec<ExecutionRef>, StoreError> {
        let mut steps = self.step_executions.write();
        let mut cancelled = Vec::new();
        for s in steps.values_mut() {
            if s.batch_member_id == batch_member_id && !s.status.is_terminal() {
                s.status = StepStatus::Cancelled;
                s.completed_at = Some(Utc::now());
                cancelled.push(ExecutionRef::Step(s.id));
            }
        }
        Ok(cancelled)
    }

    async fn list_pollable_executions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRef>, StoreError> {
        let mut out = Vec::new();
        for s in self.step_executions.read().values() {
            if s.status == StepStatus::Polling && is_poll_due(s.poll.last_polled_at, s.poll.poll_interval_sec, now) {
                out.push(ExecutionRef::Step(s.id));
            }
        }
        for i in self.init_executions.read().values() {
            if i.status == StepStatus::Polling && is_poll_due(i.poll.last_polled_at, i.poll.poll_interval_sec, now) {
                out.push(ExecutionRef::Init(i.id));
            }
        }
        Ok(out)
    }

    async fn list_retryable_executions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRef>, StoreError> {
        let mut out = Vec::new();
        for s in self.step_executions.read().values() {
            if s.status == StepStatus::Pending && s.retry.retry_count > 0 {
                if let Some(retry_after) = s.retry.retry_after {
                    if retry_after <= now {
                        out.push(ExecutionRef::Step(s.id));
                    }
                }
            }
        }
        for i in self.init_executions.read().values() {
            if i.status == StepStatus::Pending && i.retry.retry_count > 0 {
                if let Some(retry_after) = i.retry.retry_after {
                    if retry_after <= now {
                        out.push(ExecutionRef::Init(i.id));
                    }
                }
            }
        }
        Ok(out)
    }
}

fn is_poll_due(last_polled_at: Option<DateTime<Utc>>, interval_sec: u64, now: DateTime<Utc>) -> bool {
    match last_polled_at {
        Some(last) => now >= last + chrono::Duration::seconds(interval_sec as i64),
        None => true,
    }
}
