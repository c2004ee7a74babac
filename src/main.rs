use std::sync::Arc;

use slot_runner::audit::AuditSink;
use slot_runner::config::{AppConfig, RunMode};
use slot_runner::driver::RemoteDriver;
use slot_runner::exec::{BatchMode, Orchestrator};
use slot_runner::store::JsonStore;
use slot_runner::tasks::TaskService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        driver_url = %config.driver_url,
        ?config.mode,
        "Slot Runner v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let store = Arc::new(JsonStore::open(&config.data_dir).await?);
    let audit = AuditSink::new(store.clone());
    let service = Arc::new(TaskService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        audit.clone(),
    ));
    let driver = Arc::new(RemoteDriver::new(config.driver_url.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        service.clone(),
        store.clone(),
        driver,
        audit,
    ));

    let mode = match config.mode {
        RunMode::Sequential => BatchMode::Sequential,
        RunMode::Parallel => BatchMode::parallel(config.max_concurrency),
    };

    // Ctrl-C stops the batch and returns in-work tasks to the queue.
    let stopper = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping batch");
            if let Err(e) = stopper.stop().await {
                tracing::error!(error = %e, "Stop sweep failed");
            }
        }
    });

    match orchestrator.run_queue(mode).await {
        Ok(summary) => {
            tracing::info!(
                succeeded = summary.succeeded,
                not_run = summary.not_run,
                "Batch finished"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Batch did not complete cleanly");
            Err(e.into())
        }
    }
}
