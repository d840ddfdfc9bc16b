//! The scheduler: the periodic (default every 5 minutes) tick that keeps
//! the store in sync with each runbook's data source and drives the
//! event-based handoff to the orchestrator (spec §4.2).

pub mod anchor;
pub mod error;
pub mod normalize;
pub mod tick;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use migeng_dispatch::MessageBus;
use migeng_store::MigrationStore;
use tokio::sync::watch;
use tracing::{error, instrument};

pub use error::SchedulerError;
pub use tick::run_all_ticks;

/// Scheduler loop configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// How often to run a tick across every active runbook.
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_interval: Duration::from_secs(5 * 60) }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}

/// Runs [`run_all_ticks`] on a fixed interval until told to shut down.
pub struct Scheduler {
    store: Arc<dyn MigrationStore>,
    bus: Arc<dyn MessageBus>,
    config: SchedulerConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn MigrationStore>,
        bus: Arc<dyn MessageBus>,
        config: SchedulerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self { store, bus, config, shutdown_rx }
    }

    #[instrument(skip(self))]
    pub async fn run(&mut self) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = run_all_ticks(&self.store, &self.bus, Utc::now()).await {
                        error!(%err, "scheduler tick failed");
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
