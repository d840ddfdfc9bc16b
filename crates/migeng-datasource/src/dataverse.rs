//! Dataverse (Dynamics 365) data source client, queried over its OData web
//! API. `connection_env` names the environment variable holding the
//! Dataverse environment URL, e.g. `https://org.crm.dynamics.com`.

use async_trait::async_trait;
use migeng_runbook::{BatchTimeMode, DataSourceDef};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::client::{extract_batch_time, extract_primary_key, DataSourceQueryClient, QueryRow};
use crate::error::DataSourceError;

#[derive(Clone)]
pub struct DataverseClient {
    http: Client,
}

impl DataverseClient {
    pub fn new() -> Self {
        Self { http: Client::new() }
    }
}

impl Default for DataverseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSourceQueryClient for DataverseClient {
    #[instrument(skip(self, data_source))]
    async fn query_rows(&self, data_source: &DataSourceDef) -> Result<Vec<QueryRow>, DataSourceError> {
        let base_url = std::env::var(&data_source.connection_env)
            .map_err(|_| DataSourceError::MissingConfig(data_source.connection_env.clone()))?;
        let token = std::env::var(format!("{}_TOKEN", data_source.connection_env))
            .map_err(|_| DataSourceError::MissingConfig(format!("{}_TOKEN", data_source.connection_env)))?;

        let url = format!("{}/api/data/v9.2/{}", base_url.trim_end_matches('/'), data_source.query);
        debug!(%url, "querying dataverse");

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header("OData-MaxVersion", "4.0")
            .header("OData-Version", "4.0")
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DataSourceError::Response(format!("dataverse returned {status}: {body}")));
        }

        let body: Value = response.json().await?;
        let records = body
            .get("value")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        records
            .into_iter()
            .map(|record| {
                let columns = record
                    .as_object()
                    .cloned()
                    .ok_or_else(|| DataSourceError::Response("dataverse row was not an object".into()))?;
                let primary_key = extract_primary_key(&columns, &data_source.primary_key)?;
                let batch_time = match &data_source.batch_time {
                    BatchTimeMode::Column(column) => Some(extract_batch_time(&columns, column)?),
                    BatchTimeMode::Immediate => None,
                };
                Ok(QueryRow { primary_key, batch_time, columns })
            })
            .collect()
    }
}
