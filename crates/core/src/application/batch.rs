//! Threaded batch runner
//!
//! Runs independent items on a bounded pool and reports every item's outcome.
//! A failing or panicking item never stops its siblings.

use super::panic_guard::describe_join_error;
use crate::error::Result;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub item: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Item ids that succeeded, sorted
    pub succeeded: Vec<String>,
    /// Failures, sorted by item id
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

#[derive(Debug, Clone)]
pub struct ThreadedBatchRunner {
    width: usize,
}

impl ThreadedBatchRunner {
    /// `width` is clamped to at least 1
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Run `work` for every `(id, item)` with at most `width` in flight
    pub async fn run<T, F, Fut>(&self, items: Vec<(String, T)>, work: F) -> BatchReport
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.width));
        let work = Arc::new(work);
        let mut pending: HashSet<String> = HashSet::with_capacity(items.len());
        let mut set = JoinSet::new();

        for (id, item) in items {
            pending.insert(id.clone());
            let semaphore = semaphore.clone();
            let work = work.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                debug!(item = %id, "Batch item started");

                // Inner task isolates panics, including ones raised while
                // building the future, so the id stays attached to the outcome
                let outcome = match tokio::spawn(async move { work(item).await }).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(join_err) => Err(describe_join_error(join_err)),
                };
                (id, outcome)
            });
        }

        let mut report = BatchReport::default();
        let mut lost = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    pending.remove(&id);
                    match outcome {
                        Ok(()) => report.succeeded.push(id),
                        Err(message) => {
                            error!(item = %id, error = %message, "Batch item failed");
                            report.failed.push(BatchFailure {
                                item: id,
                                error: message,
                            });
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Batch worker lost");
                    lost = Some(describe_join_error(e));
                }
            }
        }

        // Whatever never reported back counts as failed
        for id in pending {
            report.failed.push(BatchFailure {
                item: id,
                error: lost.clone().unwrap_or_else(|| "worker lost".to_string()),
            });
        }

        report.succeeded.sort();
        report.failed.sort_by(|a, b| a.item.cmp(&b.item));
        report
    }
}
