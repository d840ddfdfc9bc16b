//! `batch-init`: runs a batch's init steps sequentially before any phase is
//! dispatched (spec §4.3, invariant I3).

use std::sync::Arc;

use migeng_core::StepStatus;
use migeng_dispatch::MessageBus;
use migeng_store::{ExecutionRef, MigrationStore, NewInitExecution};
use serde_json::Value;
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::progression::check_init_progression;
use crate::templating::{poll_state_for, resolve_init_step, retry_state_for};

pub async fn handle_batch_init(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    batch_id: Uuid,
) -> Result<(), OrchestratorError> {
    let batch = store.get_batch(batch_id).await?;
    let runbook = store.get_runbook(batch.runbook_id).await?;
    let def = migeng_runbook::parse(&runbook.raw_yaml)?;

    for (index, step) in def.init.iter().enumerate() {
        let step_index = index as u32;
        if store
            .find_init_execution(batch_id, runbook.version, &step.name, step_index)
            .await?
            .is_some()
        {
            continue;
        }
        match resolve_init_step(step, batch_id, batch.batch_start_time) {
            Ok((function_name, params)) => {
                store
                    .create_init_execution(NewInitExecution {
                        batch_id,
                        step_name: step.name.clone(),
                        step_index,
                        runbook_version: runbook.version,
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
                // Init steps run strictly in order (invariant I3): an
                // unresolvable template fails this one in place and later
                // init steps are left uncreated rather than run out of
                // sequence. `check_init_progression` below drives any
                // already-created, still-pending steps to completion and
                // then fails the batch once this one is the last non-
                // terminal execution.
                let execution = store
                    .create_init_execution(NewInitExecution {
                        batch_id,
                        step_name: step.name.clone(),
                        step_index,
                        runbook_version: runbook.version,
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
                    .set_execution_failed(ExecutionRef::Init(execution.id), &err.to_string())
                    .await?;
                break;
            }
        }
    }

    let existing = store.list_init_executions(batch_id).await?;
    let already_running = existing
        .iter()
        .any(|e| matches!(e.status, StepStatus::Dispatched | StepStatus::Polling));
    if already_running {
        return Ok(());
    }
    check_init_progression(store, bus, batch_id).await
}
