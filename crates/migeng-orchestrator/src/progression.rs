//! Central place for post-event consequences (spec §4.4). Called by the
//! result processor, `PhaseDueHandler`, and `PollCheckHandler`.

use std::collections::HashMap;
use std::sync::Arc;

use migeng_core::{BatchStatus, PhaseStatus, StepStatus};
use migeng_dispatch::MessageBus;
use migeng_store::{ExecutionRef, MigrationStore, TerminalOutcome};
use uuid::Uuid;

use crate::dispatch::dispatch_pending;
use crate::error::OrchestratorError;

/// After a step succeeds, dispatch the member's next pending step in the
/// same phase, or fall through to phase-completion evaluation.
pub async fn check_member_progression(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    phase_execution_id: Uuid,
    batch_member_id: Uuid,
) -> Result<(), OrchestratorError> {
    match store
        .first_pending_step_for_member(phase_execution_id, batch_member_id)
        .await?
    {
        Some(step) => dispatch_pending(store, bus, ExecutionRef::Step(step.id)).await,
        None => check_phase_completion(store, phase_execution_id).await,
    }
}

/// Isolates a member after an unrecoverable step failure: cancels every
/// non-terminal step execution for it across all phases of its batch, then
/// re-evaluates completion for every phase it touched.
pub async fn handle_member_failure(
    store: &Arc<dyn MigrationStore>,
    batch_member_id: Uuid,
) -> Result<(), OrchestratorError> {
    store.mark_member_failed(batch_member_id).await?;
    store.cancel_all_nonterminal_for_member(batch_member_id).await?;

    let steps = store.list_step_executions_for_member(batch_member_id).await?;
    let mut touched_phases: Vec<Uuid> = steps.iter().map(|s| s.phase_execution_id).collect();
    touched_phases.sort();
    touched_phases.dedup();
    for phase_execution_id in touched_phases {
        check_phase_completion(store, phase_execution_id).await?;
    }
    Ok(())
}

/// Dispatches the next pending init execution for a batch, or — once every
/// init execution is terminal — flips the batch from `init_dispatched` to
/// `active` so due phases can start dispatching (spec §4.3/§4.6; never
/// dispatches two init executions concurrently, invariant I3).
pub async fn check_init_progression(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    batch_id: Uuid,
) -> Result<(), OrchestratorError> {
    let existing = store.list_init_executions(batch_id).await?;
    let already_running = existing
        .iter()
        .any(|e| matches!(e.status, StepStatus::Dispatched | StepStatus::Polling));
    if already_running {
        return Ok(());
    }

    if let Some(next) = store.first_pending_init(batch_id).await? {
        return dispatch_pending(store, bus, ExecutionRef::Init(next.id)).await;
    }

    if !existing.is_empty() && existing.iter().all(|e| e.status.is_terminal()) {
        let batch = store.get_batch(batch_id).await?;
        if batch.status == BatchStatus::InitDispatched {
            let all_succeeded = existing.iter().all(|e| e.status == StepStatus::Succeeded);
            let next = if all_succeeded { BatchStatus::Active } else { BatchStatus::Failed };
            store.set_batch_status(batch_id, next).await?;
        }
    }
    Ok(())
}

/// A phase is `completed` iff at least one member succeeded on every one of
/// its steps; otherwise `failed`. Guarded so only one concurrent caller
/// performs the transition (spec invariant: set exactly once).
pub async fn check_phase_completion(
    store: &Arc<dyn MigrationStore>,
    phase_execution_id: Uuid,
) -> Result<(), OrchestratorError> {
    let steps = store.list_step_executions_for_phase(phase_execution_id).await?;
    if steps.iter().any(|s| !s.status.is_terminal()) {
        return Ok(());
    }

    let mut by_member: HashMap<Uuid, Vec<StepStatus>> = HashMap::new();
    for step in &steps {
        by_member.entry(step.batch_member_id).or_default().push(step.status);
    }
    let any_member_completed = by_member
        .values()
        .any(|statuses| statuses.iter().all(|s| *s == StepStatus::Succeeded));
    let outcome = if any_member_completed {
        TerminalOutcome::Completed
    } else {
        TerminalOutcome::Failed
    };

    let transitioned = store
        .complete_phase_if_dispatched(phase_execution_id, outcome)
        .await?;
    if !transitioned {
        return Ok(());
    }
    let phase = store.get_phase_execution(phase_execution_id).await?;
    check_batch_completion(store, phase.batch_id).await
}

/// A batch is `completed` iff every phase execution is terminal and at
/// least one reached `completed`; otherwise `failed`.
pub async fn check_batch_completion(
    store: &Arc<dyn MigrationStore>,
    batch_id: Uuid,
) -> Result<(), OrchestratorError> {
    let phases = store.list_phase_executions(batch_id).await?;
    if phases.iter().any(|p| !p.status.is_terminal()) {
        return Ok(());
    }
    let any_completed = phases.iter().any(|p| p.status == PhaseStatus::Completed);
    let outcome = if any_completed {
        TerminalOutcome::Completed
    } else {
        TerminalOutcome::Failed
    };
    store.complete_batch_if_ready(batch_id, outcome).await?;
    Ok(())
}
