//! `poll-check`: re-sends a long-running job's poll request, or declares a
//! poll timeout once `poll_started_at + poll_timeout_sec` has elapsed
//! (spec §4.3, §4.6).

use std::sync::Arc;

use chrono::{Duration, Utc};
use migeng_core::Execution;
use migeng_core::StepStatus;
use migeng_dispatch::{BackoffPolicy, JobEnvelope, MessageBus};
use migeng_store::{ExecutionRecord, ExecutionRef, MigrationStore};

use crate::dispatch::{execution_fields, poll_job_id, to_handle};
use crate::error::OrchestratorError;
use crate::progression::{check_init_progression, handle_member_failure};

pub async fn handle_poll_check(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    r: ExecutionRef,
) -> Result<(), OrchestratorError> {
    let record = store.get_execution(r).await?;
    if record.status() != StepStatus::Polling {
        return Ok(());
    }

    let poll = record.poll();
    let poll_started_at = poll
        .poll_started_at
        .expect("a polling execution always has poll_started_at set");
    let timeout_at = poll_started_at + Duration::seconds(poll.poll_timeout_sec as i64);
    let now = Utc::now();

    if now > timeout_at {
        store.set_execution_poll_timeout(r).await?;
        return match record {
            ExecutionRecord::Step(s) => handle_member_failure(store, s.batch_member_id).await,
            ExecutionRecord::Init(i) => check_init_progression(store, bus, i.batch_id).await,
        };
    }

    let next_poll_count = poll.poll_count + 1;
    store.update_execution_poll(r, now).await?;

    let (r, worker_id, function_name, params) = execution_fields(&record);
    let envelope = JobEnvelope {
        job_id: poll_job_id(r, next_poll_count),
        execution: to_handle(r),
        worker_id: worker_id.to_string(),
        function_name: function_name.to_string(),
        params: params.clone(),
        dispatched_at: now,
    };
    BackoffPolicy::dispatch_default()
        .retry(|| {
            let bus = bus.clone();
            let envelope = envelope.clone();
            async move { bus.publish_job(envelope).await }
        })
        .await?;
    Ok(())
}
