use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migeng_runbook::DataSourceDef;
use serde_json::{Map, Value};

use crate::error::DataSourceError;

/// One row returned by a data source query, before multi-valued column
/// normalization (that expansion is the scheduler's job, not the client's —
/// the client's contract ends at "one row per candidate record").
#[derive(Debug, Clone)]
pub struct QueryRow {
    pub primary_key: String,
    pub batch_time: Option<DateTime<Utc>>,
    pub columns: Map<String, Value>,
}

/// Queries an external system for migration candidates. One implementation
/// per backing system, the way LLM providers each get their own driver
/// crate-adjacent module behind a shared trait.
#[async_trait]
pub trait DataSourceQueryClient: Send + Sync {
    async fn query_rows(&self, data_source: &DataSourceDef) -> Result<Vec<QueryRow>, DataSourceError>;
}

pub(crate) fn extract_primary_key(
    row: &Map<String, Value>,
    primary_key: &str,
) -> Result<String, DataSourceError> {
    match row.get(primary_key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(DataSourceError::MissingPrimaryKey(primary_key.to_string())),
    }
}

pub(crate) fn extract_batch_time(
    row: &Map<String, Value>,
    column: &str,
) -> Result<DateTime<Utc>, DataSourceError> {
    let raw = row
        .get(column)
        .and_then(Value::as_str)
        .ok_or_else(|| DataSourceError::MissingBatchTimeColumn(column.to_string()))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DataSourceError::Response(format!("invalid batch time {raw:?}: {e}")))
}
