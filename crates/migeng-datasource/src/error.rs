#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    #[error("missing environment variable: {0}")]
    MissingConfig(String),

    #[error("request to data source failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("data source returned an error response: {0}")]
    Response(String),

    #[error("row is missing primary key column {0:?}")]
    MissingPrimaryKey(String),

    #[error("row is missing batch time column {0:?}")]
    MissingBatchTimeColumn(String),

    #[error("unsupported data source type: {0}")]
    Unsupported(String),
}
