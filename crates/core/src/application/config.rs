// Orchestrator configuration

use super::constants::{
    DEFAULT_BATCH_WIDTH, DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_TASK_TIMEOUT,
};
use crate::error::{AppError, Result};
use std::time::Duration;

/// Tunables shared by the poller, lock and batch runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Delay between task status polls
    pub poll_interval: Duration,

    /// How long to wait for one async task before giving up
    pub task_timeout: Duration,

    /// How long to wait for a shared-resource lock
    pub lock_timeout: Duration,

    /// Max concurrent items inside a threaded step
    pub batch_width: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            batch_width: DEFAULT_BATCH_WIDTH,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_width == 0 {
            return Err(AppError::Config("batch_width must be at least 1".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(AppError::Config("poll_interval must be positive".to_string()));
        }
        if self.poll_interval > self.task_timeout {
            return Err(AppError::Config(format!(
                "poll_interval ({:?}) exceeds task_timeout ({:?})",
                self.poll_interval, self.task_timeout
            )));
        }
        Ok(())
    }
}
