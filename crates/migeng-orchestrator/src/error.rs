#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] migeng_store::StoreError),

    #[error(transparent)]
    Runbook(#[from] migeng_runbook::RunbookInvalid),

    #[error(transparent)]
    Dispatch(#[from] migeng_dispatch::DispatchError),
}
