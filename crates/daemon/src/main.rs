//! Site Audit Orchestrator - Main Entry Point
//! Wires the SQLite stores, the browser worker adapter, the scheduler and
//! the background sweep together and runs until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Import workspace crates
use siteaudit_core::application::{
    shutdown_channel, JobManager, JobSweeper, RunCoordinator, ScheduleExecutor, SchedulerConfig,
    SchedulerService, SweepConfig,
};
use siteaudit_core::port::id_provider::UuidProvider;
use siteaudit_core::port::time_provider::SystemTimeProvider;
use siteaudit_infra_engine::HttpEngineFactory;
use siteaudit_infra_sqlite::{
    create_pool, run_migrations, SqliteJobStore, SqliteScheduleStore, SqliteSiteStore,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_DB_PATH: &str = "~/.siteaudit/orchestrator.db";
const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:9222";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging
    let log_format = std::env::var("SITEAUDIT_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("siteaudit=info"))
        .expect("Failed to create env filter");

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            // Development: Pretty formatting with colors
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("Site Audit Orchestrator v{} starting...", VERSION);

    // 2. Load configuration
    let db_path = std::env::var("SITEAUDIT_DB_PATH")
        .unwrap_or_else(|_| shellexpand::tilde(DEFAULT_DB_PATH).into_owned());
    let engine_url =
        std::env::var("SITEAUDIT_ENGINE_URL").unwrap_or_else(|_| DEFAULT_ENGINE_URL.to_string());
    let run_scheduler = std::env::var("SITEAUDIT_RUN_SCHEDULER")
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(true);

    info!(db_path = %db_path, "Initializing database...");

    // 3. Initialize database
    let pool = create_pool(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Setup dependencies (DI wiring)
    let time_provider = Arc::new(SystemTimeProvider);
    let id_provider = Arc::new(UuidProvider);
    let job_store = Arc::new(SqliteJobStore::new(pool.clone()));
    let schedule_store = Arc::new(SqliteScheduleStore::new(pool.clone()));
    let site_store = Arc::new(SqliteSiteStore::new(pool.clone(), id_provider.clone()));
    let engine = Arc::new(
        HttpEngineFactory::new(engine_url.clone())
            .map_err(|e| anyhow::anyhow!("Engine adapter setup failed: {}", e))?,
    );

    let jobs = Arc::new(JobManager::new(job_store, time_provider.clone()));
    let coordinator: Arc<dyn ScheduleExecutor> = Arc::new(RunCoordinator::new(
        jobs.clone(),
        schedule_store.clone(),
        site_store,
        engine,
        id_provider,
        time_provider.clone(),
    ));

    // 5. Run crash recovery: jobs orphaned by a previous process get failed
    //    before anything new starts
    info!("Running crash recovery...");
    let sweeper = JobSweeper::new(jobs.clone(), SweepConfig::default());
    match sweeper.sweep_once().await {
        Ok(()) => info!("Crash recovery completed"),
        Err(e) => tracing::error!(error = ?e, "Crash recovery failed"),
    }

    // 6. Start background sweep
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    tokio::spawn(sweeper.run(shutdown_rx));

    // 7. Start scheduler
    let scheduler = Arc::new(SchedulerService::new(
        SchedulerConfig {
            enabled: run_scheduler,
            ..Default::default()
        },
        schedule_store,
        coordinator,
        time_provider,
    ));
    scheduler
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("Scheduler start failed: {}", e))?;

    info!(engine_url = %engine_url, "System ready. Waiting for schedules...");
    info!("Press Ctrl+C to shutdown");

    // 8. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 9. Graceful shutdown: stop firing, drain in-flight runs, stop the sweep
    scheduler.shutdown(true).await;
    shutdown_tx.shutdown();

    info!("Shutdown complete.");

    Ok(())
}
