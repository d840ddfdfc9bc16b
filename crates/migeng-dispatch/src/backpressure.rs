//! Per-worker-pool concurrency limiting. Each worker id gets its own
//! semaphore sized to its configured concurrency; a full worker simply
//! makes `try_acquire` fail rather than blocking the dispatcher.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct WorkerConcurrencyLimiter {
    default_capacity: usize,
    semaphores: DashMap<String, Arc<Semaphore>>,
}

impl WorkerConcurrencyLimiter {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            default_capacity: default_capacity.max(1),
            semaphores: DashMap::new(),
        }
    }

    fn semaphore_for(&self, worker_id: &str) -> Arc<Semaphore> {
        self.semaphores
            .entry(worker_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.default_capacity)))
            .clone()
    }

    /// Returns a permit if the worker pool has room, `None` if saturated.
    pub fn try_acquire(&self, worker_id: &str) -> Option<OwnedSemaphorePermit> {
        self.semaphore_for(worker_id).try_acquire_owned().ok()
    }

    pub fn available_slots(&self, worker_id: &str) -> usize {
        self.semaphore_for(worker_id).available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturates_at_configured_capacity() {
        let limiter = WorkerConcurrencyLimiter::new(2);
        let _p1 = limiter.try_acquire("w1").expect("first permit");
        let _p2 = limiter.try_acquire("w1").expect("second permit");
        assert!(limiter.try_acquire("w1").is_none());
    }

    #[test]
    fn workers_are_independent() {
        let limiter = WorkerConcurrencyLimiter::new(1);
        let _p1 = limiter.try_acquire("w1").expect("w1 permit");
        assert!(limiter.try_acquire("w2").is_some());
    }
}
