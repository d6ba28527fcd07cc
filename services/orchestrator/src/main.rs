//! Armada orchestrator
//!
//! Accepts job submissions, persists them, and drives one reconciliation
//! engine per active job until reference, running, and store state agree.

use std::sync::Arc;

use anyhow::Result;
use armada_model::{JobDescriptor, RetryPolicy};
use armada_orchestrator::{
    adapters::StaticCapacityGroups, config::Config, store::InMemoryJobStore,
    supervisor::JobSupervisor,
};
use armada_reconcile::{CapacityGroupService, JobStore, SystemClock};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to ARMADA_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting armada orchestrator");
    info!(
        reconcile_interval_ms = config.reconcile_interval_ms,
        dev_mode = config.dev_mode,
        "Configuration loaded"
    );

    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let capacity_groups: Arc<dyn CapacityGroupService> = Arc::new(StaticCapacityGroups::default());
    let clock = Arc::new(SystemClock);

    let mut supervisor = JobSupervisor::new(&config, store, capacity_groups, clock);

    // Submit a demo job in dev mode so a fresh checkout shows a full
    // lifecycle in the logs.
    if config.dev_mode {
        match supervisor
            .submit_job(JobDescriptor::batch(
                "demo",
                2,
                RetryPolicy::Immediate { retries: 1 },
            ))
            .await
        {
            Ok(job_id) => info!(job_id = %job_id, "Submitted demo job (dev mode)"),
            Err(e) => error!(error = %e, "Failed to submit demo job"),
        }
    }

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let supervisor_handle = tokio::spawn(async move {
        supervisor.run(shutdown_rx).await;
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);

    let shutdown_timeout = std::time::Duration::from_secs(10);
    if let Err(e) = tokio::time::timeout(shutdown_timeout, supervisor_handle).await {
        warn!(error = %e, "Supervisor did not shut down in time");
    }

    info!("Orchestrator shutdown complete");
    Ok(())
}
