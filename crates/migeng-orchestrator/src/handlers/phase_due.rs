//! `phase-due`: materializes step executions for a phase and dispatches
//! each active member's first step (spec §4.3).

use std::sync::Arc;

use futures::future::join_all;
use migeng_core::StepStatus;
use migeng_dispatch::MessageBus;
use migeng_store::{ExecutionRef, MigrationStore, NewStepExecution};
use serde_json::Value;
use uuid::Uuid;

use crate::dispatch::dispatch_pending;
use crate::error::OrchestratorError;
use crate::progression::handle_member_failure;
use crate::templating::{poll_state_for, resolve_member_step, retry_state_for};

pub async fn handle_phase_due(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    phase_execution_id: Uuid,
) -> Result<(), OrchestratorError> {
    let phase = store.get_phase_execution(phase_execution_id).await?;
    let batch = store.get_batch(phase.batch_id).await?;
    let runbook = store.get_runbook(batch.runbook_id).await?;
    let def = migeng_runbook::parse(&runbook.raw_yaml)?;
    let phase_def = match def.phase(&phase.phase_name) {
        Some(p) => p,
        None => return Ok(()),
    };

    let members = store.list_active_members(phase.batch_id).await?;
    for member in &members {
        let scope = member.template_scope(phase.batch_id, batch.batch_start_time);
        for (index, step) in phase_def.steps.iter().enumerate() {
            let step_index = index as u32;
            if store
                .find_step_execution(phase_execution_id, member.id, step_index)
                .await?
                .is_some()
            {
                continue;
            }
            match resolve_member_step(step, &scope) {
                Ok((function_name, params)) => {
                    store
                        .create_step_execution(NewStepExecution {
                            phase_execution_id,
                            batch_member_id: member.id,
                            step_name: step.name.clone(),
                            step_index,
                            runbook_version: phase.runbook_version,
                            worker_id: step.worker_id.clone(),
                            function_name,
                            params_json: params,
                            output_params: step.output_params.clone(),
                            on_failure: step.on_failure.clone(),
                            poll: poll_state_for(step),
                            retry: retry_state_for(step, def.default_retry.as_ref()),
                        })
                        .await?;
                }
                Err(err) => {
                    // Unresolvable params never become resolvable by retrying:
                    // create the execution already failed and isolate this
                    // member, same as an unrecoverable worker-reported failure
                    // (spec §7) — other members keep progressing untouched.
                    let execution = store
                        .create_step_execution(NewStepExecution {
                            phase_execution_id,
                            batch_member_id: member.id,
                            step_name: step.name.clone(),
                            step_index,
                            runbook_version: phase.runbook_version,
                            worker_id: step.worker_id.clone(),
                            function_name: step.function.clone(),
                            params_json: Value::Null,
                            output_params: step.output_params.clone(),
                            on_failure: step.on_failure.clone(),
                            poll: poll_state_for(step),
                            retry: retry_state_for(step, def.default_retry.as_ref()),
                        })
                        .await?;
                    store
                        .set_execution_failed(ExecutionRef::Step(execution.id), &err.to_string())
                        .await?;
                    handle_member_failure(store, member.id).await?;
                    break;
                }
            }
        }
    }

    store.set_phase_dispatched(phase_execution_id).await?;

    // Only the first step of each member is dispatched here; redelivery of
    // this same event must not re-dispatch members who have already moved
    // past it (idempotence P2), so this looks at step_index 0 specifically
    // rather than "first pending" — a member mid-phase has a non-pending
    // step 0 and a pending step 1 that belongs to progression, not here.
    // Members are independent, so the actual dispatches run in parallel.
    let mut dispatches = Vec::new();
    for member in &members {
        if let Some(step0) = store.find_step_execution(phase_execution_id, member.id, 0).await? {
            if step0.status == StepStatus::Pending {
                dispatches.push(dispatch_pending(store, bus, ExecutionRef::Step(step0.id)));
            }
        }
    }
    for result in join_all(dispatches).await {
        result?;
    }
    Ok(())
}
