//! Handles a worker's [`ResultEnvelope`] (spec §4.3's `ResultProcessor`).
//! Every path starts with a terminal-state guard: a result for an execution
//! that is already terminal (a duplicate delivery, or a result that raced a
//! poll timeout) is ignored rather than re-applied (invariant I6).

use std::sync::Arc;

use chrono::{Duration, Utc};
use migeng_core::Execution;
use migeng_dispatch::{ExecutionHandle, JobEnvelope, JobOutcome, MessageBus, ResultEnvelope};
use migeng_store::{ExecutionRecord, ExecutionRef, MigrationStore};
use serde_json::{Map, Value};
use tracing::warn;

use crate::dispatch::to_handle;
use crate::error::OrchestratorError;
use crate::progression::{check_init_progression, check_member_progression, handle_member_failure};
use crate::templating::{resolve_init_step, resolve_member_step};

pub async fn handle_result(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    result: ResultEnvelope,
) -> Result<(), OrchestratorError> {
    let r = match result.execution {
        ExecutionHandle::Step { execution_id } => ExecutionRef::Step(execution_id),
        ExecutionHandle::Init { execution_id } => ExecutionRef::Init(execution_id),
    };
    let record = store.get_execution(r).await?;
    if record.status().is_terminal() {
        return Ok(());
    }

    match result.outcome {
        JobOutcome::StillRunning => handle_still_running(store, r, &record).await,
        JobOutcome::Succeeded { result: payload } => {
            handle_succeeded(store, bus, r, &record, payload).await
        }
        JobOutcome::Failed { error } => handle_failed(store, bus, r, &record, &error).await,
    }
}

async fn handle_still_running(
    store: &Arc<dyn MigrationStore>,
    r: ExecutionRef,
    record: &ExecutionRecord,
) -> Result<(), OrchestratorError> {
    if record.poll().poll_started_at.is_none() {
        store.set_execution_polling(r, Utc::now()).await?;
    }
    Ok(())
}

async fn handle_succeeded(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    r: ExecutionRef,
    record: &ExecutionRecord,
    payload: Value,
) -> Result<(), OrchestratorError> {
    if let ExecutionRecord::Step(step) = record {
        let updates = extract_output_params(record.output_params(), &payload);
        if !updates.is_empty() {
            store.merge_member_worker_data(step.batch_member_id, updates).await?;
        }
    }

    store.set_execution_succeeded(r, payload, Utc::now()).await?;

    match record {
        ExecutionRecord::Step(s) => {
            check_member_progression(store, bus, s.phase_execution_id, s.batch_member_id).await
        }
        ExecutionRecord::Init(i) => check_init_progression(store, bus, i.batch_id).await,
    }
}

async fn handle_failed(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    r: ExecutionRef,
    record: &ExecutionRecord,
    error: &str,
) -> Result<(), OrchestratorError> {
    if record.retry().has_budget() {
        let retry_after = Utc::now() + Duration::seconds(record.retry().retry_interval_sec as i64);
        store.set_execution_retry_pending(r, retry_after).await?;
        if let Err(err) = bus.schedule_retry_check(to_handle(r), retry_after).await {
            warn!(%err, "retry-check nudge failed to schedule, relying on the tick-driven retry clock");
        }
        return Ok(());
    }

    store.set_execution_failed(r, error).await?;

    if let Some(rollback_name) = record.on_failure() {
        run_rollback(store, bus, record, rollback_name).await;
    }

    match record {
        ExecutionRecord::Step(s) => handle_member_failure(store, s.batch_member_id).await,
        ExecutionRecord::Init(i) => check_init_progression(store, bus, i.batch_id).await,
    }
}

/// Rollback steps are dispatched fire-and-forget, same as
/// `on_member_removed` cleanup: failures are logged and swallowed rather
/// than compounding the original failure (spec §7).
async fn run_rollback(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    record: &ExecutionRecord,
    rollback_name: &str,
) {
    let batch_id = match record {
        ExecutionRecord::Step(s) => {
            let phase = match store.get_phase_execution(s.phase_execution_id).await {
                Ok(p) => p,
                Err(err) => {
                    warn!(%err, "rollback lookup failed to load phase execution");
                    return;
                }
            };
            phase.batch_id
        }
        ExecutionRecord::Init(i) => i.batch_id,
    };
    let batch = match store.get_batch(batch_id).await {
        Ok(b) => b,
        Err(err) => {
            warn!(%err, "rollback lookup failed to load batch");
            return;
        }
    };
    let runbook = match store.get_runbook(batch.runbook_id).await {
        Ok(r) => r,
        Err(err) => {
            warn!(%err, "rollback lookup failed to load runbook");
            return;
        }
    };
    let def = match migeng_runbook::parse(&runbook.raw_yaml) {
        Ok(d) => d,
        Err(err) => {
            warn!(%err, "rollback lookup failed to parse runbook");
            return;
        }
    };
    let rollback_steps = match def.rollbacks.get(rollback_name) {
        Some(steps) => steps,
        None => return,
    };

    let member = match record {
        ExecutionRecord::Step(s) => match store.get_member(s.batch_member_id).await {
            Ok(m) => Some(m),
            Err(err) => {
                warn!(%err, "rollback lookup failed to load member");
                return;
            }
        },
        ExecutionRecord::Init(_) => None,
    };

    for step in rollback_steps {
        let resolved = match &member {
            Some(member) => {
                let scope = member.template_scope(batch_id, batch.batch_start_time);
                resolve_member_step(step, &scope)
            }
            None => resolve_init_step(step, batch_id, batch.batch_start_time),
        };
        let (function_name, params) = match resolved {
            Ok(r) => r,
            Err(err) => {
                warn!(step = %step.name, %err, "rollback template resolution failed, skipping");
                continue;
            }
        };
        let job = JobEnvelope {
            job_id: format!("rollback-{batch_id}-{}", step.name),
            execution: ExecutionHandle::Step { execution_id: batch_id },
            worker_id: step.worker_id.clone(),
            function_name,
            params,
            dispatched_at: Utc::now(),
        };
        if let Err(err) = bus.publish_job(job).await {
            warn!(step = %step.name, %err, "rollback dispatch failed, swallowing");
        }
    }
}

/// Declared `output_params` map a result field name to the member-scope
/// variable it feeds; only fields actually present in the result are
/// merged (spec §3 — `output_params` on a step execution).
fn extract_output_params(
    output_params: &std::collections::HashMap<String, String>,
    result: &Value,
) -> Map<String, Value> {
    let mut updates = Map::new();
    let Some(obj) = result.as_object() else {
        return updates;
    };
    for (var_name, result_field) in output_params {
        if let Some(value) = obj.get(result_field) {
            updates.insert(var_name.clone(), value.clone());
        }
    }
    updates
}
