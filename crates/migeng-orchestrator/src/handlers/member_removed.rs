//! `member-removed`: cancels a member's in-flight work, then fires the
//! runbook's `on_member_removed` cleanup steps fire-and-forget (spec §4.3).
//! Cleanup dispatch has no persisted execution row — failures are logged
//! and swallowed rather than surfaced, matching the rollback dispatch
//! convention in §7.

use std::sync::Arc;

use chrono::Utc;
use migeng_dispatch::{ExecutionHandle, JobEnvelope, MessageBus};
use migeng_store::MigrationStore;
use tracing::warn;
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::templating::resolve_member_step;

pub async fn handle_member_removed(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    batch_id: Uuid,
    batch_member_id: Uuid,
) -> Result<(), OrchestratorError> {
    store.cancel_all_nonterminal_for_member(batch_member_id).await?;

    let batch = store.get_batch(batch_id).await?;
    let runbook = store.get_runbook(batch.runbook_id).await?;
    let def = migeng_runbook::parse(&runbook.raw_yaml)?;
    if def.on_member_removed.is_empty() {
        return Ok(());
    }

    let member = store.get_member(batch_member_id).await?;
    let scope = member.template_scope(batch_id, batch.batch_start_time);

    for step in &def.on_member_removed {
        let (function_name, params) = match resolve_member_step(step, &scope) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(step = %step.name, %err, "on_member_removed template resolution failed, skipping");
                continue;
            }
        };
        let job = JobEnvelope {
            job_id: format!("on-member-removed-{batch_member_id}-{}", step.name),
            execution: ExecutionHandle::Step { execution_id: batch_member_id },
            worker_id: step.worker_id.clone(),
            function_name,
            params,
            dispatched_at: Utc::now(),
        };
        if let Err(err) = bus.publish_job(job).await {
            warn!(step = %step.name, %err, "on_member_removed dispatch failed, swallowing");
        }
    }
    Ok(())
}
