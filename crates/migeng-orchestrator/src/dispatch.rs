use std::sync::Arc;

use chrono::Utc;
use migeng_dispatch::{BackoffPolicy, ExecutionHandle, JobEnvelope, MessageBus};
use migeng_store::{ExecutionRecord, ExecutionRef, MigrationStore};
use serde_json::Value;
use tracing::debug;

use crate::error::OrchestratorError;

/// Pulls the dispatch-relevant fields out of a step or init execution
/// without forcing the `Execution` trait to carry worker/function/params —
/// those are dispatch concerns, not progression concerns.
pub fn execution_fields(record: &ExecutionRecord) -> (ExecutionRef, &str, &str, &Value) {
    match record {
        ExecutionRecord::Step(s) => (ExecutionRef::Step(s.id), s.worker_id.as_str(), s.function_name.as_str(), &s.params_json),
        ExecutionRecord::Init(i) => (ExecutionRef::Init(i.id), i.worker_id.as_str(), i.function_name.as_str(), &i.params_json),
    }
}

/// Dispatches an already-created, still-`pending` execution using its
/// stored (already resolved) function name and params.
pub async fn dispatch_pending(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    r: ExecutionRef,
) -> Result<(), OrchestratorError> {
    let record = store.get_execution(r).await?;
    let (r, worker_id, function_name, params) = execution_fields(&record);
    let job_id = initial_job_id(r);
    dispatch(store, bus, r, worker_id, function_name, params.clone(), job_id).await
}

fn type_tag(r: ExecutionRef) -> &'static str {
    if r.is_init() {
        "init"
    } else {
        "step"
    }
}

pub fn initial_job_id(r: ExecutionRef) -> String {
    format!("{}-{}", type_tag(r), r.id())
}

pub fn poll_job_id(r: ExecutionRef, poll_count: u32) -> String {
    format!("{}-{}-poll-{}", type_tag(r), r.id(), poll_count)
}

pub fn retry_job_id(r: ExecutionRef, retry_count: u32) -> String {
    format!("{}-{}-retry-{}", type_tag(r), r.id(), retry_count)
}

pub(crate) fn to_handle(r: ExecutionRef) -> ExecutionHandle {
    match r {
        ExecutionRef::Step(id) => ExecutionHandle::Step { execution_id: id },
        ExecutionRef::Init(id) => ExecutionHandle::Init { execution_id: id },
    }
}

/// Marks the execution dispatched in the store, then publishes its job
/// envelope with bounded retry and exponential backoff (spec §7) to ride
/// out a momentarily saturated worker pool or a transient bus error.
/// Dispatches store-side first: if every publish attempt still fails, the
/// error propagates to the caller, which logs it and moves on — the
/// execution is left `dispatched` with a job_id that never arrives, and
/// recovery from there is the broker's job (redelivering whatever event
/// triggered this dispatch), since the broker itself is an external
/// collaborator out of scope here.
pub async fn dispatch(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    r: ExecutionRef,
    worker_id: &str,
    function_name: &str,
    params: Value,
    job_id: String,
) -> Result<(), OrchestratorError> {
    let now = Utc::now();
    store.set_execution_dispatched(r, &job_id, now).await?;
    debug!(%job_id, worker_id, function_name, "dispatching job");
    let envelope = JobEnvelope {
        job_id,
        execution: to_handle(r),
        worker_id: worker_id.to_string(),
        function_name: function_name.to_string(),
        params,
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
