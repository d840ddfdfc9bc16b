//! Validated, in-memory runbook definition — the output of [`crate::parser::parse`].

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSourceType {
    Dataverse,
    Databricks,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchTimeMode {
    Column(String),
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiValuedFormat {
    SemicolonDelimited,
    CommaDelimited,
    JsonArray,
}

#[derive(Debug, Clone)]
pub struct MultiValuedColumn {
    pub name: String,
    pub format: MultiValuedFormat,
}

#[derive(Debug, Clone)]
pub struct DataSourceDef {
    pub source_type: DataSourceType,
    pub connection_env: String,
    pub warehouse_id_env: Option<String>,
    pub query: String,
    pub primary_key: String,
    pub batch_time: BatchTimeMode,
    pub multi_valued_columns: Vec<MultiValuedColumn>,
}

#[derive(Debug, Clone)]
pub struct PollDef {
    pub interval_sec: u64,
    pub timeout_sec: u64,
}

#[derive(Debug, Clone)]
pub struct RetryDef {
    pub max_retries: u32,
    pub interval_sec: u64,
}

#[derive(Debug, Clone)]
pub struct StepDef {
    pub name: String,
    pub worker_id: String,
    pub function: String,
    pub params: HashMap<String, String>,
    pub output_params: HashMap<String, String>,
    pub on_failure: Option<String>,
    pub poll: Option<PollDef>,
    pub retry: Option<RetryDef>,
}

#[derive(Debug, Clone)]
pub struct PhaseDef {
    pub name: String,
    pub offset_minutes: i64,
    pub steps: Vec<StepDef>,
}

#[derive(Debug, Clone)]
pub struct RunbookDef {
    pub name: String,
    pub description: Option<String>,
    pub data_source: DataSourceDef,
    pub init: Vec<StepDef>,
    pub phases: Vec<PhaseDef>,
    pub on_member_removed: Vec<StepDef>,
    pub rollbacks: HashMap<String, Vec<StepDef>>,
    pub default_retry: Option<RetryDef>,
}

impl RunbookDef {
    /// Every step defined anywhere in the runbook (init, phases,
    /// on_member_removed, rollbacks), used by the validator to check
    /// `on_failure` references and step-name uniqueness.
    pub fn all_rollback_names(&self) -> std::collections::HashSet<&str> {
        self.rollbacks.keys().map(|s| s.as_str()).collect()
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseDef> {
        self.phases.iter().find(|p| p.name == name)
    }
}
