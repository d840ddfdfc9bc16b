pub mod client;
pub mod databricks;
pub mod dataverse;
pub mod error;

pub use client::{DataSourceQueryClient, QueryRow};
pub use databricks::DatabricksClient;
pub use dataverse::DataverseClient;
pub use error::DataSourceError;

use migeng_runbook::DataSourceType;

/// Picks the client implementation for a runbook's declared data source
/// type.
pub fn client_for(source_type: &DataSourceType) -> Box<dyn DataSourceQueryClient> {
    match source_type {
        DataSourceType::Dataverse => Box::new(DataverseClient::new()),
        DataSourceType::Databricks => Box::new(DatabricksClient::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use migeng_runbook::{BatchTimeMode, DataSourceDef};
    use serde_json::Map;

    /// A fixed-row client used to exercise scheduler logic without making
    /// network calls.
    pub struct FixedRowsClient(pub Vec<QueryRow>);

    #[async_trait]
    impl DataSourceQueryClient for FixedRowsClient {
        async fn query_rows(&self, _data_source: &DataSourceDef) -> Result<Vec<QueryRow>, DataSourceError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn fixed_rows_client_returns_configured_rows() {
        let mut columns = Map::new();
        columns.insert("mailbox".into(), "alice@example.com".into());
        let client = FixedRowsClient(vec![QueryRow {
            primary_key: "1".into(),
            batch_time: None,
            columns,
        }]);
        let ds = DataSourceDef {
            source_type: DataSourceType::Dataverse,
            connection_env: "UNUSED".into(),
            warehouse_id_env: None,
            query: "unused".into(),
            primary_key: "mailbox".into(),
            batch_time: BatchTimeMode::Immediate,
            multi_valued_columns: vec![],
        };
        let rows = client.query_rows(&ds).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].primary_key, "1");
    }

    #[test]
    fn client_for_picks_matching_backend() {
        let _ = client_for(&DataSourceType::Dataverse);
        let _ = client_for(&DataSourceType::Databricks);
    }
}
