pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use memory::InMemoryMigrationStore;
pub use postgres::PostgresMigrationStore;
pub use store::MigrationStore;
pub use types::{
    ExecutionRecord, ExecutionRef, NewBatch, NewInitExecution, NewPhaseExecution,
    NewStepExecution, RunbookLockGuard, TerminalOutcome,
};
