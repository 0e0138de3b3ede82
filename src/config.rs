use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Upper bound on waiting for a wallet lock.
    pub lock_timeout: Duration,
    /// Upper bound on waiting for an in-flight request with the same id.
    pub in_flight_wait: Duration,
    /// Maximum number of decimal places of an amount.
    pub max_scale: u32,
    /// Retention of recorded outcomes. `None` keeps them forever.
    pub idempotency_ttl: Option<Duration>,
    /// Journal file for durable storage. `None` keeps everything in memory.
    pub journal_path: Option<PathBuf>,
    /// Number of worker threads used by the batch runner.
    pub workers: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            in_flight_wait: Duration::from_secs(5),
            max_scale: 2,
            idempotency_ttl: None,
            journal_path: None,
            workers: 4,
        }
    }
}

impl LedgerConfig {
    /// Defaults overridden by `LEDGER_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(ms) = env_var::<u64>("LEDGER_LOCK_TIMEOUT_MS")? {
            config.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_var::<u64>("LEDGER_IN_FLIGHT_WAIT_MS")? {
            config.in_flight_wait = Duration::from_millis(ms);
        }
        if let Some(scale) = env_var::<u32>("LEDGER_MAX_SCALE")? {
            config.max_scale = scale;
        }
        if let Some(secs) = env_var::<u64>("LEDGER_IDEMPOTENCY_TTL_SECS")? {
            config.idempotency_ttl = Some(Duration::from_secs(secs));
        }
        if let Some(path) = env_var::<PathBuf>("LEDGER_JOURNAL_PATH")? {
            config.journal_path = Some(path);
        }
        if let Some(workers) = env_var::<usize>("LEDGER_WORKERS")? {
            anyhow::ensure!(workers > 0, "LEDGER_WORKERS must be at least 1");
            config.workers = workers;
        }
        Ok(config)
    }
}

fn env_var<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value `{value}` for {name}")),
        Err(_) => Ok(None),
    }
}
