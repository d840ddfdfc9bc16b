//! Raw (unvalidated) shape of the runbook YAML document, per spec §6.

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct RunbookYaml {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub data_source: DataSourceYaml,
    #[serde(default)]
    pub init: Vec<StepYaml>,
    pub phases: Vec<PhaseYaml>,
    #[serde(default)]
    pub on_member_removed: Vec<StepYaml>,
    #[serde(default)]
    pub rollbacks: HashMap<String, Vec<StepYaml>>,
    #[serde(default)]
    pub retry: Option<RetryYaml>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataSourceYaml {
    #[serde(rename = "type")]
    pub source_type: String,
    pub connection: String,
    #[serde(default)]
    pub warehouse_id: Option<String>,
    pub query: String,
    pub primary_key: String,
    #[serde(default)]
    pub batch_time_column: Option<String>,
    #[serde(default)]
    pub batch_time: Option<String>,
    #[serde(default)]
    pub multi_valued_columns: Vec<MultiValuedColumnYaml>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MultiValuedColumnYaml {
    pub name: String,
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhaseYaml {
    pub name: String,
    pub offset: String,
    pub steps: Vec<StepYaml>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepYaml {
    pub name: String,
    pub worker_id: String,
    pub function: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub output_params: HashMap<String, String>,
    #[serde(default)]
    pub on_failure: Option<String>,
    #[serde(default)]
    pub poll: Option<PollYaml>,
    #[serde(default)]
    pub retry: Option<RetryYaml>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollYaml {
    pub interval: String,
    pub timeout: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryYaml {
    pub max_retries: u32,
    pub interval: String,
}
