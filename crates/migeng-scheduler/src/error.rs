#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] migeng_store::StoreError),

    #[error(transparent)]
    Runbook(#[from] migeng_runbook::RunbookInvalid),

    #[error(transparent)]
    DataSource(#[from] migeng_datasource::DataSourceError),

    #[error(transparent)]
    Template(#[from] migeng_runbook::TemplateResolutionError),

    #[error(transparent)]
    Dispatch(#[from] migeng_dispatch::DispatchError),
}
