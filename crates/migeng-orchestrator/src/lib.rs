//! Event-driven orchestrator (spec §4.3/§4.4): consumes `SchedulerEvent`s
//! and worker `ResultEnvelope`s off the message bus and drives every
//! non-tick-driven state transition. Never talks to the scheduler
//! directly — the store and the bus are the only shared state.

pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod progression;
pub mod result_processor;
pub mod templating;

use std::sync::Arc;

use migeng_dispatch::{MessageBus, SchedulerEvent};
use migeng_store::MigrationStore;
use tracing::{error, instrument};

pub use error::OrchestratorError;

/// Owns no state of its own beyond the store and bus handles; every
/// transition it drives is persisted before the next event is read, so the
/// orchestrator can be killed and restarted without losing progress.
pub struct Orchestrator {
    store: Arc<dyn MigrationStore>,
    bus: Arc<dyn MessageBus>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn MigrationStore>, bus: Arc<dyn MessageBus>) -> Self {
        Self { store, bus }
    }

    /// Drives both the event stream and the result stream until the bus
    /// closes. A single event/result's failure is logged and does not stop
    /// the loop — the affected entity simply stays in its current state
    /// until the next message that touches it.
    pub async fn run(&self) {
        loop {
            tokio::select! {
                event = self.bus.next_event() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    }
                }
                result = self.bus.next_result() => {
                    match result {
                        Some(result) => self.handle_worker_result(result).await,
                        None => break,
                    }
                }
            }
        }
    }

    #[instrument(skip(self, event))]
    async fn handle_event(&self, event: SchedulerEvent) {
        let outcome = match event {
            SchedulerEvent::BatchDetected { batch_id } => {
                handlers::handle_batch_init(&self.store, &self.bus, batch_id).await
            }
            SchedulerEvent::MemberAdded { batch_id, batch_member_id } => {
                handlers::handle_member_added(&self.store, &self.bus, batch_id, batch_member_id).await
            }
            SchedulerEvent::MemberRemoved { batch_id, batch_member_id } => {
                handlers::handle_member_removed(&self.store, &self.bus, batch_id, batch_member_id).await
            }
            SchedulerEvent::PhaseDue { phase_execution_id } => {
                handlers::handle_phase_due(&self.store, &self.bus, phase_execution_id).await
            }
            SchedulerEvent::PollCheck { execution } => {
                handlers::handle_poll_check(&self.store, &self.bus, to_execution_ref(execution)).await
            }
            SchedulerEvent::RetryCheck { execution } => {
                handlers::handle_retry_check(&self.store, &self.bus, to_execution_ref(execution)).await
            }
        };
        if let Err(err) = outcome {
            error!(%err, "event handler failed");
        }
    }

    #[instrument(skip(self, result))]
    async fn handle_worker_result(&self, result: migeng_dispatch::ResultEnvelope) {
        if let Err(err) = result_processor::handle_result(&self.store, &self.bus, result).await {
            error!(%err, "result processor failed");
        }
    }
}

fn to_execution_ref(handle: migeng_dispatch::ExecutionHandle) -> migeng_store::ExecutionRef {
    match handle {
        migeng_dispatch::ExecutionHandle::Step { execution_id } => {
            migeng_store::ExecutionRef::Step(execution_id)
        }
        migeng_dispatch::ExecutionHandle::Init { execution_id } => {
            migeng_store::ExecutionRef::Init(execution_id)
        }
    }
}
