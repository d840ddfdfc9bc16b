//! End-to-end exercise of the non-init path: a batch is detected with no
//! init steps, goes straight to `active`, its one phase becomes due, the
//! member's single step is dispatched, and a successful result cascades
//! through phase completion to batch completion.

use std::sync::Arc;

use chrono::Utc;
use migeng_core::{BatchStatus, Execution, MemberStatus, PhaseStatus, StepStatus};
use migeng_dispatch::{ExecutionHandle, InMemoryBus, JobOutcome, MessageBus, ResultEnvelope};
use migeng_orchestrator::handlers::{handle_member_added, handle_phase_due};
use migeng_orchestrator::result_processor::handle_result;
use migeng_store::{InMemoryMigrationStore, MigrationStore, NewBatch, NewPhaseExecution};
use uuid::Uuid;

fn runbook_yaml() -> &'static str {
    r#"
name: Test Migration
data_source:
  type: dataverse
  connection: CONN
  query: "SELECT * FROM candidates"
  primary_key: uid
  batch_time: immediate
phases:
  - name: migrate
    offset: T-0
    steps:
      - name: move
        worker_id: migrate-pool
        function: move_mailbox
        params:
          to: "{{uid}}"
        output_params:
          new_mailbox_id: new_id
"#
}

fn seed_runbook(store: &InMemoryMigrationStore) -> migeng_core::Runbook {
    let runbook = migeng_core::Runbook {
        id: Uuid::now_v7(),
        name: "Test Migration".into(),
        version: 1,
        raw_yaml: runbook_yaml().to_string(),
        data_table_name: "runbook_test_migration_v1".into(),
        is_active: true,
        overdue_behavior: migeng_core::OverdueBehavior::Rerun,
        rerun_init: false,
        ignore_overdue_applied: false,
        last_error: None,
        created_at: Utc::now(),
    };
    store.insert_runbook(runbook.clone());
    runbook
}

#[tokio::test]
async fn phase_due_dispatches_and_result_completes_batch() {
    let memory = InMemoryMigrationStore::new();
    let runbook = seed_runbook(&memory);
    let store: Arc<dyn MigrationStore> = Arc::new(memory);
    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new(8));

    let batch = store
        .create_batch(NewBatch {
            runbook_id: runbook.id,
            batch_start_time: Utc::now(),
            is_manual: false,
            created_by: None,
        })
        .await
        .unwrap();
    store.set_batch_status(batch.id, BatchStatus::Active).await.unwrap();

    let phase = store
        .create_phase_execution(NewPhaseExecution {
            batch_id: batch.id,
            phase_name: "migrate".into(),
            offset_minutes: 0,
            due_at: Utc::now(),
            runbook_version: runbook.version,
        })
        .await
        .unwrap();

    let member = store
        .insert_member(batch.id, "u1", serde_json::json!({"uid": "u1"}))
        .await
        .unwrap();

    handle_phase_due(&store, &bus, phase.id).await.unwrap();

    let job = bus.next_job().await.expect("step should have been dispatched");
    assert_eq!(job.function_name, "move_mailbox");
    assert_eq!(job.params["to"], "u1");

    let execution_id = match job.execution {
        ExecutionHandle::Step { execution_id } => execution_id,
        _ => panic!("expected a step execution handle"),
    };

    let phase_after = store.get_phase_execution(phase.id).await.unwrap();
    assert_eq!(phase_after.status, PhaseStatus::Dispatched);

    handle_result(
        &store,
        &bus,
        ResultEnvelope {
            job_id: job.job_id,
            execution: job.execution,
            outcome: JobOutcome::Succeeded { result: serde_json::json!({"new_id": "m-123"}) },
            reported_at: Utc::now(),
        },
    )
    .await
    .unwrap();

    let step = store
        .get_execution(migeng_store::ExecutionRef::Step(execution_id))
        .await
        .unwrap();
    assert_eq!(step.status(), StepStatus::Succeeded);

    let member_after = store.get_member(member.id).await.unwrap();
    assert_eq!(member_after.worker_data_json["new_mailbox_id"], "m-123");

    let phase_final = store.get_phase_execution(phase.id).await.unwrap();
    assert_eq!(phase_final.status, PhaseStatus::Completed);

    let batch_final = store.get_batch(batch.id).await.unwrap();
    assert_eq!(batch_final.status, BatchStatus::Completed);
}

#[tokio::test]
async fn member_added_after_phase_dispatched_catches_up() {
    let memory = InMemoryMigrationStore::new();
    let runbook = seed_runbook(&memory);
    let store: Arc<dyn MigrationStore> = Arc::new(memory);
    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new(8));

    let batch = store
        .create_batch(NewBatch {
            runbook_id: runbook.id,
            batch_start_time: Utc::now(),
            is_manual: false,
            created_by: None,
        })
        .await
        .unwrap();
    store.set_batch_status(batch.id, BatchStatus::Active).await.unwrap();

    let phase = store
        .create_phase_execution(NewPhaseExecution {
            batch_id: batch.id,
            phase_name: "migrate".into(),
            offset_minutes: 0,
            due_at: Utc::now(),
            runbook_version: runbook.version,
        })
        .await
        .unwrap();

    let first_member = store
        .insert_member(batch.id, "u1", serde_json::json!({"uid": "u1"}))
        .await
        .unwrap();
    handle_phase_due(&store, &bus, phase.id).await.unwrap();
    let _ = bus.next_job().await.expect("first member's step dispatched");

    let late_member = store
        .insert_member(batch.id, "u2", serde_json::json!({"uid": "u2"}))
        .await
        .unwrap();
    handle_member_added(&store, &bus, batch.id, late_member.id).await.unwrap();

    let job = bus.next_job().await.expect("late member should be caught up");
    match job.execution {
        ExecutionHandle::Step { execution_id } => {
            let record = store
                .get_execution(migeng_store::ExecutionRef::Step(execution_id))
                .await
                .unwrap();
            assert_eq!(record.status(), StepStatus::Dispatched);
        }
        _ => panic!("expected a step execution handle"),
    }

    let members = store.list_active_members(batch.id).await.unwrap();
    assert_eq!(members.len(), 2);
    assert!(members.iter().all(|m| m.status == MemberStatus::Active));
    assert_eq!(first_member.member_key, "u1");
}
