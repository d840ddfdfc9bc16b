//! Runbook YAML parsing and validation (spec §4.1).
//!
//! Validation is pure (no I/O) and collects a complete error list instead
//! of stopping at the first problem, per spec. This is the richer of the
//! two parser variants the original system carried (the one with
//! duration/offset parse checks and template-brace checks) — see
//! SPEC_FULL.md §9.

use std::collections::{HashMap, HashSet};

use crate::duration::{parse_duration_secs, parse_offset};
use crate::grammar::{PhaseYaml, RunbookYaml, StepYaml};
use crate::template::braces_balanced;
use crate::validated::{
    BatchTimeMode, DataSourceDef, DataSourceType, MultiValuedColumn, MultiValuedFormat, PhaseDef,
    PollDef, RetryDef, RunbookDef, StepDef,
};

#[derive(Debug, Clone, thiserror::Error)]
#[error("runbook invalid: {0:?}")]
pub struct RunbookInvalid(pub Vec<String>);

/// Parse and validate a runbook YAML document.
pub fn parse(yaml: &str) -> Result<RunbookDef, RunbookInvalid> {
    let raw: RunbookYaml = serde_yaml::from_str(yaml)
        .map_err(|e| RunbookInvalid(vec![format!("yaml parse error: {e}")]))?;

    let mut errors = Vec::new();

    if raw.name.trim().is_empty() {
        errors.push("name must not be empty".to_string());
    }

    let data_source = validate_data_source(&raw, &mut errors);

    if raw.phases.is_empty() {
        errors.push("runbook must define at least one phase".to_string());
    }
    let mut phase_names = HashSet::new();
    let phases: Vec<PhaseDef> = raw
        .phases
        .iter()
        .filter_map(|p| validate_phase(p, &mut phase_names, &mut errors))
        .collect();

    let init: Vec<StepDef> = validate_steps(&raw.init, "init", &mut errors);
    let on_member_removed: Vec<StepDef> =
        validate_steps(&raw.on_member_removed, "on_member_removed", &mut errors);

    let mut rollbacks = HashMap::new();
    for (name, steps) in &raw.rollbacks {
        rollbacks.insert(
            name.clone(),
            validate_steps(steps, &format!("rollbacks.{name}"), &mut errors),
        );
    }

    let default_retry = raw.retry.as_ref().and_then(|r| validate_retry(r, "retry", &mut errors));

    // Cross-reference on_failure -> rollback name, across every step list.
    let known_rollbacks: HashSet<&str> = rollbacks.keys().map(|s| s.as_str()).collect();
    for step in init.iter().chain(on_member_removed.iter()).chain(phases.iter().flat_map(|p| p.steps.iter())) {
        if let Some(rb) = &step.on_failure {
            if !known_rollbacks.contains(rb.as_str()) {
                errors.push(format!(
                    "step {:?} references undefined rollback {:?}",
                    step.name, rb
                ));
            }
        }
    }

    if !errors.is_empty() {
        return Err(RunbookInvalid(errors));
    }

    Ok(RunbookDef {
        name: raw.name,
        description: raw.description,
        data_source: data_source.expect("no errors implies data_source validated"),
        init,
        phases,
        on_member_removed,
        rollbacks,
        default_retry,
    })
}

fn validate_data_source(raw: &RunbookYaml, errors: &mut Vec<String>) -> Option<DataSourceDef> {
    let ds = &raw.data_source;
    let source_type = match ds.source_type.as_str() {
        "dataverse" => Some(DataSourceType::Dataverse),
        "databricks" => Some(DataSourceType::Databricks),
        other => {
            errors.push(format!("data_source.type must be dataverse|databricks, got {other:?}"));
            None
        }
    };

    if ds.primary_key.trim().is_empty() {
        errors.push("data_source.primary_key is required".to_string());
    }

    if source_type == Some(DataSourceType::Databricks) && ds.warehouse_id.is_none() {
        errors.push("data_source.warehouse_id is required for databricks sources".to_string());
    }

    let batch_time = match (&ds.batch_time_column, ds.batch_time.as_deref()) {
        (Some(col), None) => Some(BatchTimeMode::Column(col.clone())),
        (None, Some("immediate")) => Some(BatchTimeMode::Immediate),
        (None, Some(other)) => {
            errors.push(format!("data_source.batch_time must be \"immediate\", got {other:?}"));
            None
        }
        (None, None) => {
            errors.push(
                "data_source must set exactly one of batch_time_column / batch_time".to_string(),
            );
            None
        }
        (Some(_), Some(_)) => {
            errors.push(
                "data_source must set exactly one of batch_time_column / batch_time, not both"
                    .to_string(),
            );
            None
        }
    };

    let mut multi_valued_columns = Vec::new();
    for col in &ds.multi_valued_columns {
        let format = match col.format.as_str() {
            "semicolon_delimited" => Some(MultiValuedFormat::SemicolonDelimited),
            "comma_delimited" => Some(MultiValuedFormat::CommaDelimited),
            "json_array" => Some(MultiValuedFormat::JsonArray),
            other => {
                errors.push(format!(
                    "multi_valued_columns[{}].format invalid: {other:?}",
                    col.name
                ));
                None
            }
        };
        if let Some(format) = format {
            multi_valued_columns.push(MultiValuedColumn {
                name: col.name.clone(),
                format,
            });
        }
    }

    match (source_type, batch_time) {
        (Some(source_type), Some(batch_time)) if !ds.primary_key.trim().is_empty() => {
            Some(DataSourceDef {
                source_type,
                connection_env: ds.connection.clone(),
                warehouse_id_env: ds.warehouse_id.clone(),
                query: ds.query.clone(),
                primary_key: ds.primary_key.clone(),
                batch_time,
                multi_valued_columns,
            })
        }
        _ => None,
    }
}

fn validate_phase(
    raw: &PhaseYaml,
    seen_names: &mut HashSet<String>,
    errors: &mut Vec<String>,
) -> Option<PhaseDef> {
    if !seen_names.insert(raw.name.clone()) {
        errors.push(format!("duplicate phase name: {:?}", raw.name));
    }

    let offset_minutes = match parse_offset(&raw.offset) {
        Ok(m) => Some(m),
        Err(e) => {
            errors.push(format!("phase {:?}: {e}", raw.name));
            None
        }
    };

    let steps = validate_steps(&raw.steps, &format!("phase {:?}", raw.name), errors);

    offset_minutes.map(|offset_minutes| PhaseDef {
        name: raw.name.clone(),
        offset_minutes,
        steps,
    })
}

fn validate_steps(raw: &[StepYaml], context: &str, errors: &mut Vec<String>) -> Vec<StepDef> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|s| validate_step(s, context, &mut seen, errors))
        .collect()
}

fn validate_step(
    raw: &StepYaml,
    context: &str,
    seen_names: &mut HashSet<String>,
    errors: &mut Vec<String>,
) -> Option<StepDef> {
    if !seen_names.insert(raw.name.clone()) {
        errors.push(format!("{context}: duplicate step name {:?}", raw.name));
    }
    if raw.worker_id.trim().is_empty() {
        errors.push(format!("{context}: step {:?} missing worker_id", raw.name));
    }
    if raw.function.trim().is_empty() {
        errors.push(format!("{context}: step {:?} missing function", raw.name));
    }
    for (pname, ptemplate) in &raw.params {
        if !braces_balanced(ptemplate) {
            errors.push(format!(
                "{context}: step {:?} param {:?} has unbalanced template braces",
                raw.name, pname
            ));
        }
    }
    if !braces_balanced(&raw.function) {
        errors.push(format!(
            "{context}: step {:?} function has unbalanced template braces",
            raw.name
        ));
    }

    let poll = raw.poll.as_ref().and_then(|p| {
        match (parse_duration_secs(&p.interval), parse_duration_secs(&p.timeout)) {
            (Ok(interval_sec), Ok(timeout_sec)) => Some(PollDef {
                interval_sec,
                timeout_sec,
            }),
            (Err(e), _) | (_, Err(e)) => {
                errors.push(format!("{context}: step {:?} poll config: {e}", raw.name));
                None
            }
        }
    });

    let retry = raw.retry.as_ref().and_then(|r| validate_retry(r, &format!("{context}: step {:?}", raw.name), errors));

    if raw.worker_id.trim().is_empty() || raw.function.trim().is_empty() {
        return None;
    }

    Some(StepDef {
        name: raw.name.clone(),
        worker_id: raw.worker_id.clone(),
        function: raw.function.clone(),
        params: raw.params.clone(),
        output_params: raw.output_params.clone(),
        on_failure: raw.on_failure.clone(),
        poll,
        retry,
    })
}

fn validate_retry(
    raw: &crate::grammar::RetryYaml,
    context: &str,
    errors: &mut Vec<String>,
) -> Option<RetryDef> {
    match parse_duration_secs(&raw.interval) {
        Ok(interval_sec) => Some(RetryDef {
            max_retries: raw.max_retries,
            interval_sec,
        }),
        Err(e) => {
            errors.push(format!("{context}: {e}"));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_yaml() -> &'static str {
        r#"
name: Mailbox Migration
data_source:
  type: dataverse
  connection: MIG_CONN
  query: "SELECT * FROM candidates"
  primary_key: uid
  batch_time_column: migration_date
phases:
  - name: pre
    offset: T-1d
    steps:
      - name: notify
        worker_id: notify-pool
        function: send_notice
        params:
          to: "{{uid}}"
  - name: migrate
    offset: T-0
    steps:
      - name: move
        worker_id: migrate-pool
        function: move_mailbox
"#
    }

    #[test]
    fn parses_valid_runbook() {
        let def = parse(valid_yaml()).unwrap();
        assert_eq!(def.phases.len(), 2);
        assert_eq!(def.phases[0].offset_minutes, 1440);
        assert_eq!(def.phases[1].offset_minutes, 0);
    }

    #[test]
    fn rejects_both_batch_time_fields() {
        let yaml = valid_yaml().replacen(
            "batch_time_column: migration_date",
            "batch_time_column: migration_date\n  batch_time: immediate",
            1,
        );
        let err = parse(&yaml).unwrap_err();
        assert!(err.0.iter().any(|e| e.contains("exactly one")));
    }

    #[test]
    fn collects_all_errors_not_just_first() {
        let yaml = r#"
name: ""
data_source:
  type: bogus
  connection: X
  query: "Q"
  primary_key: ""
phases: []
"#;
        let err = parse(yaml).unwrap_err();
        // name empty, bad type, missing primary_key, missing batch_time mode, no phases
        assert!(err.0.len() >= 4, "errors: {:?}", err.0);
    }

    #[test]
    fn rejects_on_failure_to_unknown_rollback() {
        let yaml = format!(
            "{}\nrollbacks: {{}}\n",
            valid_yaml().replacen(
                "function: move_mailbox",
                "function: move_mailbox\n        on_failure: undo_move",
                1
            )
        );
        let err = parse(&yaml).unwrap_err();
        assert!(err.0.iter().any(|e| e.contains("undefined rollback")));
    }

    #[test]
    fn databricks_requires_warehouse_id() {
        let yaml = valid_yaml().replace("type: dataverse", "type: databricks");
        let err = parse(&yaml).unwrap_err();
        assert!(err.0.iter().any(|e| e.contains("warehouse_id")));
    }
}
