// Remote Call Port
// Abstraction over the platform's management API

use crate::domain::TaskHandle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Put => write!(f, "PUT"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// A single API request, path relative to the API root (or an absolute href)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl RemoteRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Put,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            path: path.into(),
            body: None,
        }
    }

    /// Status query for an async task
    pub fn task_status(handle: &TaskHandle) -> Self {
        Self::get(handle.as_str())
    }
}

/// Response of a remote call. `task` is set when the call started an async task.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: serde_json::Value,
    pub task: Option<TaskHandle>,
}

impl RemoteResponse {
    pub fn ok(body: serde_json::Value) -> Self {
        Self {
            status: 200,
            body,
            task: None,
        }
    }

    pub fn accepted(task: TaskHandle) -> Self {
        Self {
            status: 202,
            body: serde_json::Value::Null,
            task: Some(task),
        }
    }
}

/// Remote call errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// Session token no longer valid. The only condition retried automatically.
    #[error("Session expired")]
    SessionExpired,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, RemoteError::SessionExpired)
    }
}

/// Remote Call trait
///
/// Implementations:
/// - RestRemoteCall: HTTP client against the platform API
/// - ScriptedRemoteCall: canned responses for tests
#[async_trait]
pub trait RemoteCall: Send + Sync {
    /// Issue a request
    ///
    /// # Errors
    /// - RemoteError::SessionExpired if the session must be renewed
    /// - RemoteError::Status for any other non-success reply
    async fn invoke(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError>;

    /// Establish a fresh session
    async fn reauthenticate(&self) -> Result<(), RemoteError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Reply = Result<RemoteResponse, RemoteError>;

    /// Replays scripted replies per path. The last reply queued for a path
    /// repeats forever; unknown paths answer 404.
    #[derive(Default)]
    pub struct ScriptedRemoteCall {
        replies: Mutex<HashMap<String, VecDeque<Reply>>>,
        calls: Mutex<Vec<RemoteRequest>>,
        reauth_count: AtomicUsize,
        reauth_failure: Mutex<Option<RemoteError>>,
    }

    impl ScriptedRemoteCall {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, path: impl Into<String>, reply: Reply) -> &Self {
            self.replies
                .lock()
                .unwrap()
                .entry(path.into())
                .or_default()
                .push_back(reply);
            self
        }

        /// Queue task status bodies (`{"status": ...}`) for a handle
        pub fn push_task_statuses(&self, handle: &TaskHandle, statuses: &[&str]) -> &Self {
            for status in statuses {
                self.push(
                    handle.as_str(),
                    Ok(RemoteResponse::ok(serde_json::json!({ "status": status }))),
                );
            }
            self
        }

        pub fn fail_reauth_with(&self, err: RemoteError) {
            *self.reauth_failure.lock().unwrap() = Some(err);
        }

        pub fn calls(&self) -> Vec<RemoteRequest> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn reauth_count(&self) -> usize {
            self.reauth_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteCall for ScriptedRemoteCall {
        async fn invoke(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError> {
            self.calls.lock().unwrap().push(request.clone());

            let mut replies = self.replies.lock().unwrap();
            match replies.get_mut(&request.path) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) if queue.len() == 1 => queue[0].clone(),
                _ => Err(RemoteError::Status {
                    status: 404,
                    message: format!("no scripted reply for {}", request.path),
                }),
            }
        }

        async fn reauthenticate(&self) -> Result<(), RemoteError> {
            self.reauth_count.fetch_add(1, Ordering::SeqCst);
            match self.reauth_failure.lock().unwrap().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }
}
