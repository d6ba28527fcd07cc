use anyhow::Result;
use armada_reconcile::ReconcilerConfiguration;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub dev_mode: bool,
    /// Cadence of reconciliation cycles across all active jobs.
    pub reconcile_interval_ms: u64,
    pub reconciler: ReconcilerConfiguration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let log_level = std::env::var("ARMADA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("ARMADA_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let reconcile_interval_ms = std::env::var("ARMADA_RECONCILE_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()?;

        let mut reconciler = ReconcilerConfiguration::default();
        if let Ok(capacity) = std::env::var("ARMADA_NEW_TASK_BUCKET_CAPACITY") {
            reconciler.new_task_bucket_capacity = capacity.parse()?;
        }
        if let Ok(interval) = std::env::var("ARMADA_NEW_TASK_REFILL_INTERVAL_MS") {
            reconciler.new_task_refill_interval_ms = interval.parse()?;
        }
        if let Ok(initial) = std::env::var("ARMADA_STORE_RETRY_INITIAL_DELAY_MS") {
            reconciler.store_write_retry_initial_delay_ms = initial.parse()?;
        }
        if let Ok(max) = std::env::var("ARMADA_STORE_RETRY_MAX_DELAY_MS") {
            reconciler.store_write_retry_max_delay_ms = max.parse()?;
        }

        Ok(Self {
            log_level,
            dev_mode,
            reconcile_interval_ms,
            reconciler,
        })
    }
}
