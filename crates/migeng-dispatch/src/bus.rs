//! Message bus abstraction the scheduler publishes to and the orchestrator
//! consumes from. The in-process implementation is backed by Tokio mpsc
//! channels; a production deployment would swap this for a real broker
//! without changing either subsystem's code.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit};
use uuid::Uuid;

use crate::backpressure::WorkerConcurrencyLimiter;
use crate::envelope::{ExecutionHandle, JobEnvelope, ResultEnvelope};
use crate::error::DispatchError;
use crate::event::SchedulerEvent;

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish_job(&self, job: JobEnvelope) -> Result<(), DispatchError>;
    async fn publish_event(&self, event: SchedulerEvent) -> Result<(), DispatchError>;
    async fn publish_result(&self, result: ResultEnvelope) -> Result<(), DispatchError>;

    /// Blocks until the next scheduler event is available.
    async fn next_event(&self) -> Option<SchedulerEvent>;

    /// Blocks until the next worker result is available.
    async fn next_result(&self) -> Option<ResultEnvelope>;

    /// Best-effort nudge that delivers a `RetryCheck` event for `execution`
    /// around `at`, without blocking the caller. The scheduler's tick-driven
    /// retry clock (polling `list_retryable_executions`) is authoritative;
    /// this just shortens the wait in the common case where the broker
    /// supports scheduled delivery.
    async fn schedule_retry_check(
        &self,
        execution: ExecutionHandle,
        at: DateTime<Utc>,
    ) -> Result<(), DispatchError>;
}

pub struct InMemoryBus {
    job_tx: mpsc::UnboundedSender<JobEnvelope>,
    job_rx: Mutex<mpsc::UnboundedReceiver<JobEnvelope>>,
    event_tx: mpsc::UnboundedSender<SchedulerEvent>,
    event_rx: Mutex<mpsc::UnboundedReceiver<SchedulerEvent>>,
    result_tx: mpsc::UnboundedSender<ResultEnvelope>,
    result_rx: Mutex<mpsc::UnboundedReceiver<ResultEnvelope>>,
    pub limiter: WorkerConcurrencyLimiter,
    in_flight: DashMap<Uuid, OwnedSemaphorePermit>,
}

impl InMemoryBus {
    pub fn new(default_worker_capacity: usize) -> Self {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        Self {
            job_tx,
            job_rx: Mutex::new(job_rx),
            event_tx,
            event_rx: Mutex::new(event_rx),
            result_tx,
            result_rx: Mutex::new(result_rx),
            limiter: WorkerConcurrencyLimiter::new(default_worker_capacity),
            in_flight: DashMap::new(),
        }
    }

    /// Drains the next dispatched job, intended for a test worker stub.
    pub async fn next_job(&self) -> Option<JobEnvelope> {
        self.job_rx.lock().await.recv().await
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish_job(&self, job: JobEnvelope) -> Result<(), DispatchError> {
        let permit = self
            .limiter
            .try_acquire(&job.worker_id)
            .ok_or_else(|| DispatchError::WorkerSaturated(job.worker_id.clone()))?;
        self.in_flight.insert(job.job_id, permit);
        self.job_tx.send(job).map_err(|_| DispatchError::Closed)
    }

    async fn publish_event(&self, event: SchedulerEvent) -> Result<(), DispatchError> {
        self.event_tx.send(event).map_err(|_| DispatchError::Closed)
    }

    async fn publish_result(&self, result: ResultEnvelope) -> Result<(), DispatchError> {
        self.in_flight.remove(&result.job_id);
        self.result_tx.send(result).map_err(|_| DispatchError::Closed)
    }

    async fn next_event(&self) -> Option<SchedulerEvent> {
        self.event_rx.lock().await.recv().await
    }

    async fn next_result(&self) -> Option<ResultEnvelope> {
        self.result_rx.lock().await.recv().await
    }

    async fn schedule_retry_check(
        &self,
        execution: ExecutionHandle,
        at: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let delay = (at - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = event_tx.send(SchedulerEvent::RetryCheck { execution });
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ExecutionHandle;
    use uuid::Uuid;

    #[tokio::test]
    async fn publishes_and_drains_a_job() {
        let bus = InMemoryBus::new(4);
        let job = JobEnvelope {
            job_id: format!("step-{}", Uuid::now_v7()),
            execution: ExecutionHandle::Step { execution_id: Uuid::now_v7() },
            worker_id: "mailbox-mover".into(),
            function_name: "move_mailbox".into(),
            params: serde_json::json!({}),
            dispatched_at: Utc::now(),
        };
        bus.publish_job(job.clone()).await.unwrap();
        let received = bus.next_job().await.unwrap();
        assert_eq!(received.job_id, job.job_id);
    }

    #[tokio::test]
    async fn publish_job_rejects_when_worker_saturated() {
        let bus = InMemoryBus::new(1);
        let make_job = || JobEnvelope {
            job_id: format!("step-{}", Uuid::now_v7()),
            execution: ExecutionHandle::Step { execution_id: Uuid::now_v7() },
            worker_id: "single-slot".into(),
            function_name: "f".into(),
            params: serde_json::json!({}),
            dispatched_at: Utc::now(),
        };
        bus.publish_job(make_job()).await.unwrap();
        let err = bus.publish_job(make_job()).await.unwrap_err();
        assert!(matches!(err, DispatchError::WorkerSaturated(_)));
    }

    #[tokio::test]
    async fn events_round_trip_through_the_bus() {
        let bus = InMemoryBus::new(4);
        let batch_id = Uuid::now_v7();
        bus.publish_event(SchedulerEvent::BatchDetected { batch_id }).await.unwrap();
        match bus.next_event().await {
            Some(SchedulerEvent::BatchDetected { batch_id: received }) => {
                assert_eq!(received, batch_id);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
