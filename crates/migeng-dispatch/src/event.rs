//! Events the scheduler publishes and the orchestrator consumes. Scheduler
//! and orchestrator never call one another directly — every handoff goes
//! through these events plus the shared store.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::ExecutionHandle;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SchedulerEvent {
    BatchDetected { batch_id: Uuid },
    MemberAdded { batch_id: Uuid, batch_member_id: Uuid },
    MemberRemoved { batch_id: Uuid, batch_member_id: Uuid },
    PhaseDue { phase_execution_id: Uuid },
    PollCheck { execution: ExecutionHandle },
    RetryCheck { execution: ExecutionHandle },
}
