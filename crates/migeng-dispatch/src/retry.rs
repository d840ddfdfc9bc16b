//! Bounded retry with exponential backoff for message-bus publish failures
//! (spec §7: `DispatchFailure` is "retried with exponential backoff; after
//! budget, the orchestrator handler throws and lets the broker
//! redeliver"). Mirrors the backoff shape of `durable`'s own
//! `RetryPolicy::delay_for_attempt`, sized down to the one knob dispatch
//! needs — a fixed attempt budget and no per-error-type exemptions.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff: `initial_interval`, doubling each attempt,
/// capped at `max_interval`, with +/-20% jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl BackoffPolicy {
    /// Five attempts, starting at 200ms and capping at 5s — enough to ride
    /// out a momentarily saturated worker pool or a transient bus hiccup
    /// without stalling the handler for long.
    pub const fn dispatch_default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(5),
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base =
            self.initial_interval.as_secs_f64() * 2f64.powi(attempt as i32 - 1);
        let capped = base.min(self.max_interval.as_secs_f64());
        let jitter_range = capped * 0.2;
        let jittered = if jitter_range > 0.0 {
            let mut rng = rand::thread_rng();
            (capped + rng.gen_range(-jitter_range..=jitter_range)).max(0.0)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered)
    }

    /// Retries `op` until it succeeds or `max_attempts` is reached, sleeping
    /// with backoff between failed attempts. Returns the last error once
    /// the budget is exhausted so the caller can propagate it.
    pub async fn retry<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    tokio::time::sleep(self.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = AtomicU32::new(0);
        let result: Result<&'static str, &'static str> = fast_policy(5)
            .retry(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("transient") } else { Ok("ok") } }
            })
            .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), &'static str> = fast_policy(3)
            .retry(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err("still failing") }
            })
            .await;
        assert_eq!(result, Err("still failing"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
