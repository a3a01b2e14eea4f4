// Orchestration constants (No magic values)
use std::time::Duration;

/// Interval between async task status polls (1s)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default time allowed for a single async task (1 hour)
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Default wait for a shared-resource lock (10 minutes)
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default number of concurrent items inside a threaded step
pub const DEFAULT_BATCH_WIDTH: usize = 8;

/// Resource key used by the coarse process-wide lock
pub const GLOBAL_LOCK_KEY: &str = "global";
