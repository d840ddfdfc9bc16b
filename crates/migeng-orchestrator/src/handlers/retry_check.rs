//! `retry-check`: re-dispatches an execution whose `retry_after` has
//! elapsed (spec §4.3). A no-op if something else already moved the
//! execution out of `pending` (e.g. a concurrent retry-check delivery).

use std::sync::Arc;

use migeng_core::{Execution, StepStatus};
use migeng_dispatch::MessageBus;
use migeng_store::{ExecutionRef, MigrationStore};

use crate::dispatch::{dispatch, execution_fields, retry_job_id};
use crate::error::OrchestratorError;

pub async fn handle_retry_check(
    store: &Arc<dyn MigrationStore>,
    bus: &Arc<dyn MessageBus>,
    r: ExecutionRef,
) -> Result<(), OrchestratorError> {
    let record = store.get_execution(r).await?;
    if record.status() != StepStatus::Pending {
        return Ok(());
    }
    let retry_count = record.retry().retry_count;
    let (r, worker_id, function_name, params) = execution_fields(&record);
    let job_id = retry_job_id(r, retry_count);
    dispatch(store, bus, r, worker_id, function_name, params.clone(), job_id).await
}
