//! Async task poller
//!
//! Blocks a unit until a long-running remote operation reaches a terminal
//! state. On timeout the caller only stops waiting: the remote task is not
//! cancelled and may still complete.

use super::config::OrchestratorConfig;
use super::session::invoke_with_reauth;
use crate::domain::{AsyncTask, TaskHandle, TaskState};
use crate::error::{AppError, Result};
use crate::port::{RemoteCall, RemoteRequest, RemoteResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

pub struct AsyncTaskPoller {
    remote: Arc<dyn RemoteCall>,
    poll_interval: Duration,
    default_timeout: Duration,
}

impl AsyncTaskPoller {
    pub fn new(remote: Arc<dyn RemoteCall>, poll_interval: Duration, default_timeout: Duration) -> Self {
        Self {
            remote,
            poll_interval,
            default_timeout,
        }
    }

    pub fn from_config(remote: Arc<dyn RemoteCall>, config: &OrchestratorConfig) -> Self {
        Self::new(remote, config.poll_interval, config.task_timeout)
    }

    pub fn remote(&self) -> &Arc<dyn RemoteCall> {
        &self.remote
    }

    /// Wait for `handle` to finish, polling at a fixed interval.
    ///
    /// # Errors
    /// - `RemoteOperationFailed` with the platform's message if the task failed
    ///   or was canceled
    /// - `Timeout` once `timeout` has elapsed without a terminal state
    /// - `Remote` for poll errors other than a single session expiry
    pub async fn await_task(&self, handle: &TaskHandle, timeout: Duration) -> Result<AsyncTask> {
        let started = Instant::now();
        let deadline = started + timeout;
        let request = RemoteRequest::task_status(handle);
        let mut polls: u32 = 0;

        loop {
            let response = invoke_with_reauth(self.remote.as_ref(), &request).await?;
            polls += 1;

            match TaskState::from_remote(&response.body) {
                TaskState::Success => {
                    info!(
                        task = %handle,
                        polls = polls,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Task completed"
                    );
                    return Ok(AsyncTask {
                        handle: handle.clone(),
                        state: TaskState::Success,
                        polls,
                    });
                }
                TaskState::Failed(message) => {
                    error!(task = %handle, message = %message, "Task failed");
                    return Err(AppError::RemoteOperationFailed(message));
                }
                TaskState::Canceled => {
                    error!(task = %handle, "Task canceled");
                    return Err(AppError::RemoteOperationFailed(format!(
                        "task {} was canceled",
                        handle
                    )));
                }
                TaskState::Pending => {
                    debug!(task = %handle, polls = polls, "Task still pending");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                let waited_ms = now.duration_since(started).as_millis() as u64;
                error!(task = %handle, waited_ms = waited_ms, "Gave up waiting for task");
                return Err(AppError::Timeout {
                    task: handle.to_string(),
                    waited_ms,
                });
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// `await_task` with the configured default timeout
    pub async fn await_default(&self, handle: &TaskHandle) -> Result<AsyncTask> {
        self.await_task(handle, self.default_timeout).await
    }

    /// Issue a call and, if it started an async task, wait for that task
    pub async fn invoke_and_await(&self, request: &RemoteRequest, timeout: Duration) -> Result<RemoteResponse> {
        let response = invoke_with_reauth(self.remote.as_ref(), request).await?;
        if let Some(task) = &response.task {
            self.await_task(task, timeout).await?;
        }
        Ok(response)
    }
}
