//! The scheduler tick (spec §4.2): the only place that converges the store
//! with the data source. One call per runbook per timer fire; the top-level
//! loop in [`crate::run_all_ticks`] fans this out over every active runbook
//! under its own advisory lock.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use migeng_core::{Batch, BatchStatus, OverdueBehavior, Runbook};
use migeng_datasource::QueryRow;
use migeng_dispatch::{MessageBus, SchedulerEvent};
use migeng_runbook::{BatchTimeMode, RunbookDef};
use migeng_store::{MigrationStore, NewBatch, NewPhaseExecution};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::anchor::group_by_anchor;
use crate::error::SchedulerError;
use crate::normalize::normalize_row;

/// Runs one tick across every active runbook, skipping any runbook whose
/// advisory lock is already held by a concurrent tick (spec §4.2
/// concurrency model).
#[instrument(skip(store, bus))]
pub async fn run_all_ticks(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    now: DateTime<Utc>,
) -> Result<(), SchedulerError> {
    for runbook in store.list_active_runbooks().await? {
        let Some(_guard) = store.try_lock_runbook(runbook.id).await? else {
            info!(runbook = %runbook.name, "skipping tick, already locked");
            continue;
        };
        if let Err(err) = run_tick_for_runbook(store, bus, &runbook, now).await {
            warn!(runbook = %runbook.name, %err, "tick failed for runbook, recording and continuing");
            let _ = store.record_runbook_error(runbook.id, &err.to_string()).await;
        }
    }
    Ok(())
}

#[instrument(skip(store, bus, runbook), fields(runbook = %runbook.name))]
async fn run_tick_for_runbook(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    runbook: &Runbook,
    now: DateTime<Utc>,
) -> Result<(), SchedulerError> {
    let def = migeng_runbook::parse(&runbook.raw_yaml)?;

    // 1. Query
    let client = migeng_datasource::client_for(&def.data_source.source_type);
    let mut rows = client.query_rows(&def.data_source).await?;

    // 2. Normalize multi-valued columns.
    for row in &mut rows {
        normalize_row(&mut row.columns, &def.data_source.multi_valued_columns);
    }

    // Immediate-anchor runbooks drop rows already active anywhere for this
    // runbook before grouping (spec §4.2 step 3).
    if def.data_source.batch_time == BatchTimeMode::Immediate {
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            if store
                .find_active_membership(runbook.id, &row.primary_key)
                .await?
                .is_none()
            {
                kept.push(row);
            }
        }
        rows = kept;
    }

    // 3. Group by batch anchor.
    let groups = group_by_anchor(rows, &def.data_source.batch_time, now);

    for (anchor, group_rows) in groups {
        reconcile_anchor_group(store, bus, runbook, &def, anchor, group_rows, now).await?;
    }

    // 7. Evaluate due phases across every active batch for this runbook,
    // not just the ones touched by this tick's anchor groups.
    for batch in store.list_nonterminal_batches(runbook.id).await? {
        if batch.status != BatchStatus::Active {
            continue;
        }
        for phase in store.list_due_phases(batch.id, now).await? {
            bus.publish_event(SchedulerEvent::PhaseDue { phase_execution_id: phase.id }).await?;
        }
    }

    // 8. Polling clock.
    for execution in store.list_pollable_executions(now).await? {
        bus.publish_event(SchedulerEvent::PollCheck { execution: to_handle(execution) }).await?;
    }

    // 9. Retry clock.
    for execution in store.list_retryable_executions(now).await? {
        bus.publish_event(SchedulerEvent::RetryCheck { execution: to_handle(execution) }).await?;
    }

    Ok(())
}

async fn reconcile_anchor_group(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    runbook: &Runbook,
    def: &RunbookDef,
    anchor: DateTime<Utc>,
    rows: Vec<QueryRow>,
    now: DateTime<Utc>,
) -> Result<(), SchedulerError> {
    let (batch, is_new) = match store.find_batch(runbook.id, anchor).await? {
        Some(batch) if batch.status.is_terminal() => return Ok(()),
        Some(batch) => (batch, false),
        None => {
            let batch = create_batch_with_phases(store, bus, runbook, def, anchor, now).await?;
            (batch, true)
        }
    };

    reconcile_membership(store, bus, &batch, rows, is_new).await
}

/// Step 6: creates the batch and its phase executions, applying the
/// overdue policy at phase-creation time (a phase whose `due_at` has
/// already passed at the moment the batch itself is first detected).
async fn create_batch_with_phases(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    runbook: &Runbook,
    def: &RunbookDef,
    anchor: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Batch, SchedulerError> {
    let batch = store
        .create_batch(NewBatch {
            runbook_id: runbook.id,
            batch_start_time: anchor,
            is_manual: false,
            created_by: None,
        })
        .await?;

    for phase_def in &def.phases {
        let due_at = anchor - chrono::Duration::minutes(phase_def.offset_minutes);
        let phase = store
            .create_phase_execution(NewPhaseExecution {
                batch_id: batch.id,
                phase_name: phase_def.name.clone(),
                offset_minutes: phase_def.offset_minutes,
                due_at,
                runbook_version: runbook.version,
            })
            .await?;
        if due_at <= now && runbook.overdue_behavior == OverdueBehavior::Ignore {
            store.set_phase_skipped(phase.id).await?;
        }
    }

    if def.init.is_empty() {
        store.set_batch_status(batch.id, BatchStatus::Active).await?;
    } else {
        store.set_batch_status(batch.id, BatchStatus::InitDispatched).await?;
        bus.publish_event(SchedulerEvent::BatchDetected { batch_id: batch.id }).await?;
    }

    store.get_batch(batch.id).await.map_err(SchedulerError::from)
}

/// Step 5: diffs the anchor group's rows against `batch_members`. Members
/// added at batch creation are folded into `batch-init`/the first
/// `phase-due` rather than getting their own `member-added` (spec §4.2
/// step 5).
async fn reconcile_membership(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    batch: &Batch,
    rows: Vec<QueryRow>,
    batch_is_new: bool,
) -> Result<(), SchedulerError> {
    let mut seen_keys = HashSet::with_capacity(rows.len());
    for row in rows {
        seen_keys.insert(row.primary_key.clone());
        if store.find_member_by_key(batch.id, &row.primary_key).await?.is_some() {
            continue;
        }
        let data_json = Value::Object(row.columns);
        let member = store.insert_member(batch.id, &row.primary_key, data_json).await?;
        if !batch_is_new {
            bus.publish_event(SchedulerEvent::MemberAdded {
                batch_id: batch.id,
                batch_member_id: member.id,
            })
            .await?;
        }
    }

    for member in store.list_active_members(batch.id).await? {
        if !seen_keys.contains(&member.member_key) {
            store.mark_member_removed(member.id).await?;
            bus.publish_event(SchedulerEvent::MemberRemoved {
                batch_id: batch.id,
                batch_member_id: member.id,
            })
            .await?;
        }
    }
    Ok(())
}

fn to_handle(r: migeng_store::ExecutionRef) -> migeng_dispatch::ExecutionHandle {
    match r {
        migeng_store::ExecutionRef::Step(id) => migeng_dispatch::ExecutionHandle::Step { execution_id: id },
        migeng_store::ExecutionRef::Init(id) => migeng_dispatch::ExecutionHandle::Init { execution_id: id },
    }
}
