//! Guarded/optimistic-concurrency store methods: each should apply its
//! transition exactly once and report `false` (not an error) for a
//! transition that no longer applies, so concurrent callers can race
//! harmlessly (spec §5 concurrency model).

use chrono::Utc;
use migeng_core::execution::{PollState, RetryState};
use migeng_core::{Execution, MemberStatus, PhaseStatus, StepStatus};
use migeng_store::{
    ExecutionRef, InMemoryMigrationStore, MigrationStore, NewBatch, NewPhaseExecution,
    NewStepExecution, TerminalOutcome,
};
use uuid::Uuid;

fn no_poll() -> PollState {
    PollState {
        is_poll_step: false,
        poll_interval_sec: 0,
        poll_timeout_sec: 0,
        poll_started_at: None,
        last_polled_at: None,
        poll_count: 0,
    }
}

fn no_retry() -> RetryState {
    RetryState { max_retries: 0, retry_interval_sec: 0, retry_count: 0, retry_after: None }
}

#[tokio::test]
async fn complete_phase_if_dispatched_is_one_shot() {
    let store = InMemoryMigrationStore::new();
    let batch = store
        .create_batch(NewBatch {
            runbook_id: Uuid::now_v7(),
            batch_start_time: Utc::now(),
            is_manual: false,
            created_by: None,
        })
        .await
        .unwrap();
    let phase = store
        .create_phase_execution(NewPhaseExecution {
            batch_id: batch.id,
            phase_name: "migrate".into(),
            offset_minutes: 0,
            due_at: Utc::now(),
            runbook_version: 1,
        })
        .await
        .unwrap();

    // Not yet dispatched: the guard refuses to complete it.
    let completed = store
        .complete_phase_if_dispatched(phase.id, TerminalOutcome::Completed)
        .await
        .unwrap();
    assert!(!completed);

    store.set_phase_dispatched(phase.id).await.unwrap();

    let completed = store
        .complete_phase_if_dispatched(phase.id, TerminalOutcome::Completed)
        .await
        .unwrap();
    assert!(completed);
    assert_eq!(store.get_phase_execution(phase.id).await.unwrap().status, PhaseStatus::Completed);

    // A second caller racing the same transition is a no-op, not an error.
    let completed_again = store
        .complete_phase_if_dispatched(phase.id, TerminalOutcome::Failed)
        .await
        .unwrap();
    assert!(!completed_again);
    assert_eq!(store.get_phase_execution(phase.id).await.unwrap().status, PhaseStatus::Completed);
}

#[tokio::test]
async fn cancel_execution_if_nonterminal_respects_terminal_state() {
    let store = InMemoryMigrationStore::new();
    let batch = store
        .create_batch(NewBatch {
            runbook_id: Uuid::now_v7(),
            batch_start_time: Utc::now(),
            is_manual: false,
            created_by: None,
        })
        .await
        .unwrap();
    let phase = store
        .create_phase_execution(NewPhaseExecution {
            batch_id: batch.id,
            phase_name: "migrate".into(),
            offset_minutes: 0,
            due_at: Utc::now(),
            runbook_version: 1,
        })
        .await
        .unwrap();
    let member = store.insert_member(batch.id, "u1", serde_json::json!({})).await.unwrap();
    let step = store
        .create_step_execution(NewStepExecution {
            phase_execution_id: phase.id,
            batch_member_id: member.id,
            step_name: "move".into(),
            step_index: 0,
            runbook_version: 1,
            worker_id: "pool".into(),
            function_name: "move_mailbox".into(),
            params_json: serde_json::json!({}),
            output_params: Default::default(),
            on_failure: None,
            poll: no_poll(),
            retry: no_retry(),
        })
        .await
        .unwrap();

    let cancelled = store.cancel_execution_if_nonterminal(ExecutionRef::Step(step.id)).await.unwrap();
    assert!(cancelled);
    assert_eq!(store.get_execution(ExecutionRef::Step(step.id)).await.unwrap().status(), StepStatus::Cancelled);

    // Already terminal: cancelling again is a no-op, not an error.
    let cancelled_again =
        store.cancel_execution_if_nonterminal(ExecutionRef::Step(step.id)).await.unwrap();
    assert!(!cancelled_again);
}

#[tokio::test]
async fn try_lock_runbook_is_exclusive_until_dropped() {
    let store = InMemoryMigrationStore::new();
    let runbook_id = Uuid::now_v7();

    let guard = store.try_lock_runbook(runbook_id).await.unwrap();
    assert!(guard.is_some());

    let second = store.try_lock_runbook(runbook_id).await.unwrap();
    assert!(second.is_none(), "a second concurrent tick must not acquire the same lock");

    drop(guard);

    let third = store.try_lock_runbook(runbook_id).await.unwrap();
    assert!(third.is_some(), "dropping the guard must release the lock");
}

#[tokio::test]
async fn mark_member_removed_updates_status_and_membership_listing() {
    let store = InMemoryMigrationStore::new();
    let batch = store
        .create_batch(NewBatch {
            runbook_id: Uuid::now_v7(),
            batch_start_time: Utc::now(),
            is_manual: false,
            created_by: None,
        })
        .await
        .unwrap();
    let member = store.insert_member(batch.id, "u1", serde_json::json!({})).await.unwrap();
    assert_eq!(store.list_active_members(batch.id).await.unwrap().len(), 1);

    store.mark_member_removed(member.id).await.unwrap();

    assert!(store.list_active_members(batch.id).await.unwrap().is_empty());
    let reloaded = store.get_member(member.id).await.unwrap();
    assert_eq!(reloaded.status, MemberStatus::Removed);
    assert!(reloaded.removed_at.is_some());
}
