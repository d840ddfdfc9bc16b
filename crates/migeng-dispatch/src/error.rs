#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("message bus is closed")]
    Closed,

    #[error("no backpressure slot available for worker {0}")]
    WorkerSaturated(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
