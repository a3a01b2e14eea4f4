// Async Task Domain Model

use serde::{Deserialize, Serialize};

/// Opaque reference to a long-running remote operation (usually its href)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task state. Terminal states are final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Success,
    Failed(String),
    Canceled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Pending)
    }

    /// Decode a platform task body.
    ///
    /// `success` -> Success, `error`/`failed` -> Failed, `canceled`/`aborted` ->
    /// Canceled; `queued`, `preRunning`, `running` and anything unknown are Pending.
    pub fn from_remote(body: &serde_json::Value) -> Self {
        let status = body
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        match status.as_str() {
            "success" => TaskState::Success,
            "error" | "failed" => {
                let message = body
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .or_else(|| body.get("details").and_then(|d| d.as_str()))
                    .unwrap_or("task failed without a message");
                TaskState::Failed(message.to_string())
            }
            "canceled" | "cancelled" | "aborted" => TaskState::Canceled,
            _ => TaskState::Pending,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "PENDING"),
            TaskState::Success => write!(f, "SUCCESS"),
            TaskState::Failed(_) => write!(f, "FAILED"),
            TaskState::Canceled => write!(f, "CANCELED"),
        }
    }
}

/// A polled task: handle plus last observed state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncTask {
    pub handle: TaskHandle,
    pub state: TaskState,
    pub polls: u32,
}
