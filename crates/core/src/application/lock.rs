//! Resource lock
//!
//! Mutual exclusion for critical sections that touch a shared remote resource
//! (provider gateway, shared network, IP pool). Locks are keyed by resource
//! name; `with_lock` uses one process-wide key.
//!
//! Acquisition is bounded by a timeout. Release happens when the token drops,
//! so an error or a panic inside the critical section still frees the lock.
//! Entries nobody holds or waits on are pruned on the next acquisition.

use super::config::OrchestratorConfig;
use super::constants::GLOBAL_LOCK_KEY;
use crate::error::{AppError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::{debug, warn};

pub struct ResourceLock {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    acquire_timeout: Duration,
}

/// Held lock. Dropping it releases the resource.
#[must_use = "the lock is released as soon as the token is dropped"]
pub struct ResourceLockToken {
    resource: String,
    acquired_at: Instant,
    _guard: OwnedMutexGuard<()>,
}

impl ResourceLockToken {
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

impl std::fmt::Debug for ResourceLockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLockToken")
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

impl Drop for ResourceLockToken {
    fn drop(&mut self) {
        debug!(
            resource = %self.resource,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Lock released"
        );
    }
}

impl ResourceLock {
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            acquire_timeout,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.lock_timeout)
    }

    fn slot(&self, resource: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| AppError::Internal("resource lock table poisoned".to_string()))?;
        // Only the table itself references an idle slot
        locks.retain(|key, slot| key == resource || Arc::strong_count(slot) > 1);
        Ok(locks
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    /// Number of resources currently in the lock table
    pub fn tracked(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }

    /// Acquire `resource`, waiting at most the configured timeout
    ///
    /// # Errors
    /// `LockTimeout` if the holder did not release in time
    pub async fn acquire(&self, resource: &str) -> Result<ResourceLockToken> {
        let slot = self.slot(resource)?;
        let started = Instant::now();

        match tokio::time::timeout(self.acquire_timeout, slot.lock_owned()).await {
            Ok(guard) => {
                debug!(
                    resource = %resource,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Lock acquired"
                );
                Ok(ResourceLockToken {
                    resource: resource.to_string(),
                    acquired_at: Instant::now(),
                    _guard: guard,
                })
            }
            Err(_) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(resource = %resource, waited_ms = waited_ms, "Lock acquisition timed out");
                Err(AppError::LockTimeout {
                    resource: resource.to_string(),
                    waited_ms,
                })
            }
        }
    }

    /// Run `f` while holding the process-wide lock
    pub async fn with_lock<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.with_lock_on(GLOBAL_LOCK_KEY, f).await
    }

    /// Run `f` while holding the lock on `resource`
    pub async fn with_lock_on<F, Fut, T>(&self, resource: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _token = self.acquire(resource).await?;
        f().await
    }
}
