//! Bridges runbook step definitions to resolved dispatch parameters. Member
//! steps resolve against the member's full scope (`_batch_id`,
//! `_batch_start_time`, `data_json`, `worker_data_json`); init steps only
//! ever see the two special variables (spec §4.1's `ResolveInitParams`).

use chrono::{DateTime, Utc};
use migeng_core::execution::{PollState, RetryState};
use migeng_runbook::{resolve, resolve_init_params, PollDef, RetryDef, StepDef, TemplateResolutionError};
use serde_json::{Map, Value};
use uuid::Uuid;

pub fn resolve_member_step(
    step: &StepDef,
    scope: &Map<String, Value>,
) -> Result<(String, Value), TemplateResolutionError> {
    let mut unresolved = Vec::new();
    let function_name = match resolve(&step.function, scope) {
        Ok(name) => Some(name),
        Err(e) => {
            unresolved.extend(e.0);
            None
        }
    };
    let mut params = Map::new();
    for (name, template) in &step.params {
        match resolve(template, scope) {
            Ok(value) => {
                params.insert(name.clone(), Value::String(value));
            }
            Err(e) => unresolved.extend(e.0),
        }
    }
    if !unresolved.is_empty() {
        return Err(TemplateResolutionError(unresolved));
    }
    Ok((function_name.expect("no unresolved names means function_name resolved"), Value::Object(params)))
}

pub fn resolve_init_step(
    step: &StepDef,
    batch_id: Uuid,
    batch_start_time: DateTime<Utc>,
) -> Result<(String, Value), TemplateResolutionError> {
    let mut unresolved = Vec::new();
    let function_name = match resolve_init_params(&step.function, batch_id, batch_start_time) {
        Ok(name) => Some(name),
        Err(e) => {
            unresolved.extend(e.0);
            None
        }
    };
    let mut params = Map::new();
    for (name, template) in &step.params {
        match resolve_init_params(template, batch_id, batch_start_time) {
            Ok(value) => {
                params.insert(name.clone(), Value::String(value));
            }
            Err(e) => unresolved.extend(e.0),
        }
    }
    if !unresolved.is_empty() {
        return Err(TemplateResolutionError(unresolved));
    }
    Ok((function_name.expect("no unresolved names means function_name resolved"), Value::Object(params)))
}

/// Step-level retry config overrides the runbook default entirely (spec §6).
pub fn retry_state_for(step: &StepDef, default_retry: Option<&RetryDef>) -> RetryState {
    let retry_def = step.retry.as_ref().or(default_retry);
    match retry_def {
        Some(r) => RetryState {
            max_retries: r.max_retries,
            retry_interval_sec: r.interval_sec,
            retry_count: 0,
            retry_after: None,
        },
        None => RetryState {
            max_retries: 0,
            retry_interval_sec: 0,
            retry_count: 0,
            retry_after: None,
        },
    }
}

pub fn poll_state_for(step: &StepDef) -> PollState {
    match &step.poll {
        Some(PollDef { interval_sec, timeout_sec }) => PollState {
            is_poll_step: true,
            poll_interval_sec: *interval_sec,
            poll_timeout_sec: *timeout_sec,
            poll_started_at: None,
            last_polled_at: None,
            poll_count: 0,
        },
        None => PollState::default(),
    }
}
