pub mod backpressure;
pub mod bus;
pub mod envelope;
pub mod error;
pub mod event;
pub mod retry;

pub use backpressure::WorkerConcurrencyLimiter;
pub use bus::{InMemoryBus, MessageBus};
pub use envelope::{ExecutionHandle, JobEnvelope, JobOutcome, ResultEnvelope};
pub use error::DispatchError;
pub use event::SchedulerEvent;
pub use retry::BackoffPolicy;
