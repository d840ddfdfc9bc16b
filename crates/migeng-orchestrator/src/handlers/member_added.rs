//! `member-added`: catches a new member up on every phase that has already
//! been dispatched, completed, or failed, then dispatches its first pending
//! step in the earliest such phase (spec §4.3).

use std::sync::Arc;

use migeng_core::{PhaseStatus, StepStatus};
use migeng_dispatch::MessageBus;
use migeng_store::{ExecutionRef, MigrationStore, NewStepExecution};
use serde_json::Value;
use uuid::Uuid;

use crate::dispatch::dispatch_pending;
use crate::error::OrchestratorError;
use crate::progression::handle_member_failure;
use crate::templating::{poll_state_for, resolve_member_step, retry_state_for};

pub async fn handle_member_added(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    batch_id: Uuid,
    batch_member_id: Uuid,
) -> Result<(), OrchestratorError> {
    let batch = store.get_batch(batch_id).await?;
    let runbook = store.get_runbook(batch.runbook_id).await?;
    let def = migeng_runbook::parse(&runbook.raw_yaml)?;
    let member = store.get_member(batch_member_id).await?;
    let scope = member.template_scope(batch_id, batch.batch_start_time);

    let mut phases = store.list_phase_executions(batch_id).await?;
    phases.sort_by_key(|p| p.due_at);

    let mut earliest_catchup_phase: Option<Uuid> = None;
    for phase in phases
        .iter()
        .filter(|p| matches!(p.status, PhaseStatus::Dispatched | PhaseStatus::Completed | PhaseStatus::Failed))
    {
        let phase_def = match def.phase(&phase.phase_name) {
            Some(p) => p,
            None => continue,
        };
        for (index, step) in phase_def.steps.iter().enumerate() {
            let step_index = index as u32;
            if store
                .find_step_execution(phase.id, batch_member_id, step_index)
                .await?
                .is_some()
            {
                continue;
            }
            match resolve_member_step(step, &scope) {
                Ok((function_name, params)) => {
                    store
                        .create_step_execution(NewStepExecution {
                            phase_execution_id: phase.id,
                            batch_member_id,
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
                    // Same posture as `phase_due`: an unresolvable template
                    // can't be fixed by retrying, so the execution is created
                    // already failed and this member is isolated rather than
                    // aborting the whole catch-up for every other member.
                    let execution = store
                        .create_step_execution(NewStepExecution {
                            phase_execution_id: phase.id,
                            batch_member_id,
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
                    handle_member_failure(store, batch_member_id).await?;
                    return Ok(());
                }
            }
        }
        if earliest_catchup_phase.is_none() {
            earliest_catchup_phase = Some(phase.id);
        }
    }

    if let Some(phase_id) = earliest_catchup_phase {
        if let Some(step0) = store.find_step_execution(phase_id, batch_member_id, 0).await? {
            if step0.status == StepStatus::Pending {
                dispatch_pending(store, bus, ExecutionRef::Step(step0.id)).await?;
            }
        }
    }
    Ok(())
}
