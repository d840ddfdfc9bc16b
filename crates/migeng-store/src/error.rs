use uuid::Uuid;

/// Store-layer errors (spec §7's `StoreError`-adjacent kinds).
///
/// `StateGuardMiss` is deliberately absent: a guarded update affecting zero
/// rows is not an error, it is the `Ok(false)` branch of the corresponding
/// method (see `MigrationStore::complete_phase_if_dispatched` and friends).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("runbook not found: {0}")]
    RunbookNotFound(Uuid),

    #[error("batch not found: {0}")]
    BatchNotFound(Uuid),

    #[error("batch member not found: {0}")]
    MemberNotFound(Uuid),

    #[error("phase execution not found: {0}")]
    PhaseExecutionNotFound(Uuid),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("runbook already locked: {0}")]
    AlreadyLocked(Uuid),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
