//! Core domain types for the migration workflow engine.
//!
//! This crate has no I/O. It defines the entities in the persisted schema
//! (runbooks, batches, members, phase/step/init executions), their status
//! state machines, and the `Execution` abstraction shared by step and init
//! executions. Storage, parsing, dispatch, and scheduling live in sibling
//! crates that depend on this one.

pub mod entity;
pub mod error;
pub mod execution;
pub mod status;

pub use entity::{Batch, BatchMember, PhaseExecution, Runbook};
pub use error::CoreError;
pub use execution::{Execution, ExecutionKind, InitExecution, RetryState, StepExecution};
pub use status::{BatchStatus, MemberStatus, OverdueBehavior, PhaseStatus, StepStatus};
