// CLI configuration: environment variables with flag overrides

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use vdcmig_core::application::constants::{
    DEFAULT_BATCH_WIDTH, DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_TASK_TIMEOUT,
};
use vdcmig_core::application::OrchestratorConfig;

pub const DEFAULT_DB_PATH: &str = "~/.vdcmig/checkpoints.db";

/// Orchestrator tunables
#[derive(Debug, Clone, Args)]
pub struct TuningArgs {
    /// Delay between async task status polls (ms)
    #[arg(long, env = "VDCMIG_POLL_INTERVAL_MS", default_value_t = DEFAULT_POLL_INTERVAL.as_millis() as u64)]
    pub poll_interval_ms: u64,

    /// Default wait for one async task (s)
    #[arg(long, env = "VDCMIG_TASK_TIMEOUT_SECS", default_value_t = DEFAULT_TASK_TIMEOUT.as_secs())]
    pub task_timeout_secs: u64,

    /// Wait for a shared-resource lock (s)
    #[arg(long, env = "VDCMIG_LOCK_TIMEOUT_SECS", default_value_t = DEFAULT_LOCK_TIMEOUT.as_secs())]
    pub lock_timeout_secs: u64,

    /// Concurrent items inside a threaded step
    #[arg(long, env = "VDCMIG_BATCH_WIDTH", default_value_t = DEFAULT_BATCH_WIDTH)]
    pub batch_width: usize,
}

impl TuningArgs {
    pub fn to_config(&self) -> Result<OrchestratorConfig> {
        let config = OrchestratorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            task_timeout: Duration::from_secs(self.task_timeout_secs),
            lock_timeout: Duration::from_secs(self.lock_timeout_secs),
            batch_width: self.batch_width,
        };
        config.validate().context("Invalid orchestrator settings")?;
        Ok(config)
    }
}

pub fn expand_db_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

/// Expand `~` and make sure the parent directory exists
pub fn resolve_db_path(raw: &str) -> Result<PathBuf> {
    let path = expand_db_path(raw);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    Ok(path)
}
