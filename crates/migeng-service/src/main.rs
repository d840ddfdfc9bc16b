mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use config::Config;
use migeng_dispatch::{InMemoryBus, MessageBus};
use migeng_orchestrator::Orchestrator;
use migeng_scheduler::{Scheduler, SchedulerConfig};
use migeng_store::{InMemoryMigrationStore, MigrationStore, PostgresMigrationStore};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "migeng=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("migeng-service starting...");

    let config = Config::from_env();

    let store: Arc<dyn MigrationStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .connect(url)
                .await
                .context("failed to connect to DATABASE_URL")?;
            let store = PostgresMigrationStore::new(pool);
            store.ensure_schema().await.context("failed to ensure schema")?;
            tracing::info!("using Postgres-backed store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store (not for production use)");
            Arc::new(InMemoryMigrationStore::new())
        }
    };

    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new(config.default_worker_capacity));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut scheduler = Scheduler::new(
        store.clone(),
        bus.clone(),
        SchedulerConfig::new().with_tick_interval(config.tick_interval),
        shutdown_rx,
    );
    let scheduler_handle = tokio::spawn(async move { scheduler.run().await });

    let orchestrator = Orchestrator::new(store, bus);
    let orchestrator_handle = tokio::spawn(async move { orchestrator.run().await });

    tracing::info!("scheduler and orchestrator running");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = scheduler_handle.await;
    orchestrator_handle.abort();

    Ok(())
}
