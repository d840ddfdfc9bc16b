//! Process configuration, loaded from the environment (spec §1 ambient
//! stack). `.env` is loaded first via `dotenvy` if present, then every
//! field is read from the process environment — the same split
//! `everruns-worker` and `control-plane` use for their own `Config`/
//! `RunnerConfig`/`AuthConfig` types.

use std::time::Duration;

/// `DATABASE_URL` presence decides the store backend: set it to run
/// against Postgres, leave it unset to run the in-memory store (useful for
/// demos and the reference deployment's dev mode).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub tick_interval: Duration,
    pub default_worker_capacity: usize,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());

        let tick_interval = std::env::var("MIGENG_TICK_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(5 * 60));

        let default_worker_capacity = std::env::var("MIGENG_WORKER_CAPACITY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(16);

        Self { database_url, tick_interval, default_worker_capacity }
    }
}
