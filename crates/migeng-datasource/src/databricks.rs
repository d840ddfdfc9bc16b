//! Databricks SQL warehouse client, queried through the Statement Execution
//! API. `connection_env` names the variable holding the workspace host,
//! `warehouse_id_env` names the variable holding the SQL warehouse id.

use async_trait::async_trait;
use migeng_runbook::{BatchTimeMode, DataSourceDef};
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

use crate::client::{extract_batch_time, extract_primary_key, DataSourceQueryClient, QueryRow};
use crate::error::DataSourceError;

#[derive(Clone)]
pub struct DatabricksClient {
    http: Client,
}

impl DatabricksClient {
    pub fn new() -> Self {
        Self { http: Client::new() }
    }
}

impl Default for DatabricksClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSourceQueryClient for DatabricksClient {
    #[instrument(skip(self, data_source))]
    async fn query_rows(&self, data_source: &DataSourceDef) -> Result<Vec<QueryRow>, DataSourceError> {
        let host = std::env::var(&data_source.connection_env)
            .map_err(|_| DataSourceError::MissingConfig(data_source.connection_env.clone()))?;
        let token = std::env::var(format!("{}_TOKEN", data_source.connection_env))
            .map_err(|_| DataSourceError::MissingConfig(format!("{}_TOKEN", data_source.connection_env)))?;
        let warehouse_env = data_source
            .warehouse_id_env
            .as_ref()
            .ok_or_else(|| DataSourceError::MissingConfig("warehouse_id_env".into()))?;
        let warehouse_id = std::env::var(warehouse_env)
            .map_err(|_| DataSourceError::MissingConfig(warehouse_env.clone()))?;

        let url = format!("{}/api/2.0/sql/statements", host.trim_end_matches('/'));
        debug!(%url, "submitting databricks statement");

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&json!({
                "statement": data_source.query,
                "warehouse_id": warehouse_id,
                "wait_timeout": "30s",
                "format": "JSON_ARRAY",
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DataSourceError::Response(format!("databricks returned {status}: {body}")));
        }

        let body: Value = response.json().await?;
        let status = body.get("status").and_then(|s| s.get("state")).and_then(Value::as_str);
        if status != Some("SUCCEEDED") {
            return Err(DataSourceError::Response(format!(
                "databricks statement did not succeed synchronously: {status:?}"
            )));
        }

        let columns: Vec<String> = body
            .get("manifest")
            .and_then(|m| m.get("schema"))
            .and_then(|s| s.get("columns"))
            .and_then(Value::as_array)
            .map(|cols| {
                cols.iter()
                    .filter_map(|c| c.get("name").and_then(Value::as_str).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let data_rows = body
            .get("result")
            .and_then(|r| r.get("data_array"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        data_rows
            .into_iter()
            .map(|row_values| {
                let values = row_values
                    .as_array()
                    .ok_or_else(|| DataSourceError::Response("databricks row was not an array".into()))?;
                let mut obj = Map::new();
                for (name, value) in columns.iter().zip(values.iter()) {
                    obj.insert(name.clone(), value.clone());
                }
                let primary_key = extract_primary_key(&obj, &data_source.primary_key)?;
                let batch_time = match &data_source.batch_time {
                    BatchTimeMode::Column(column) => Some(extract_batch_time(&obj, column)?),
                    BatchTimeMode::Immediate => None,
                };
                Ok(QueryRow { primary_key, batch_time, columns: obj })
            })
            .collect()
    }
}
