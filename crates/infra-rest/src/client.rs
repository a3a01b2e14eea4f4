//! REST RemoteCall Implementation
//!
//! Talks JSON over HTTP to the platform's management API. The session token
//! obtained by `reauthenticate` is attached to every request; a 401 reply is
//! reported as `SessionExpired` so the caller can renew and retry once.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, LOCATION};
use reqwest::{Client, Method as HttpMethod, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use vdcmig_core::domain::TaskHandle;
use vdcmig_core::port::{Method, RemoteCall, RemoteError, RemoteRequest, RemoteResponse};

/// Longest error body kept in `RemoteError::Status`
const MAX_ERROR_BODY: usize = 512;

fn default_session_path() -> String {
    "/api/sessions".to_string()
}

fn default_token_header() -> String {
    "x-vcloud-authorization".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Clone, Deserialize)]
pub struct RestConfig {
    /// API root, e.g. `https://vcd.example.com`
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Sent as `Accept: application/*+json;version=<v>` when set
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default = "default_session_path")]
    pub session_path: String,
    /// Response header carrying the session token, echoed on every request
    #[serde(default = "default_token_header")]
    pub token_header: String,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for RestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("api_version", &self.api_version)
            .field("session_path", &self.session_path)
            .field("token_header", &self.token_header)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            api_version: None,
            session_path: default_session_path(),
            token_header: default_token_header(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

pub struct RestRemoteCall {
    client: Client,
    config: RestConfig,
    token: RwLock<Option<String>>,
}

impl RestRemoteCall {
    pub fn new(config: RestConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RemoteError::Transport(format!("Failed to create client: {}", e)))?;

        Ok(Self {
            client,
            config,
            token: RwLock::new(None),
        })
    }

    /// Absolute hrefs (e.g. task links) are used as-is
    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
        }
    }

    fn accept(&self) -> String {
        match &self.config.api_version {
            Some(version) => format!("application/*+json;version={}", version),
            None => "application/json".to_string(),
        }
    }

    async fn error_from(response: Response) -> RemoteError {
        let status = response.status();
        let mut message = response.text().await.unwrap_or_default();
        if message.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        if message.is_empty() {
            message = status.canonical_reason().unwrap_or("unknown").to_string();
        }
        RemoteError::Status {
            status: status.as_u16(),
            message,
        }
    }

    fn task_from(status: StatusCode, location: Option<&HeaderValue>, body: &serde_json::Value) -> Option<TaskHandle> {
        if status == StatusCode::ACCEPTED {
            if let Some(href) = location.and_then(|v| v.to_str().ok()) {
                return Some(TaskHandle::new(href));
            }
        }
        let is_task = body
            .get("type")
            .and_then(|t| t.as_str())
            .is_some_and(|t| t.contains("task"));
        if is_task {
            return body.get("href").and_then(|h| h.as_str()).map(TaskHandle::new);
        }
        None
    }
}

fn http_method(method: Method) -> HttpMethod {
    match method {
        Method::Get => HttpMethod::GET,
        Method::Post => HttpMethod::POST,
        Method::Put => HttpMethod::PUT,
        Method::Delete => HttpMethod::DELETE,
    }
}

#[async_trait]
impl RemoteCall for RestRemoteCall {
    async fn invoke(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        let url = self.url(&request.path);
        let mut builder = self
            .client
            .request(http_method(request.method), &url)
            .header(ACCEPT, self.accept());

        if let Some(token) = self.token.read().await.as_deref() {
            builder = builder.header(self.config.token_header.as_str(), token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(method = %request.method, url = %url, "Remote call");
        let response = builder
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!(url = %url, "Session rejected");
            return Err(RemoteError::SessionExpired);
        }
        if !status.is_success() {
            return Err(Self::error_from(response).await);
        }

        let location = response.headers().get(LOCATION).cloned();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let body = if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| RemoteError::InvalidResponse(e.to_string()))?
        };
        let task = Self::task_from(status, location.as_ref(), &body);

        Ok(RemoteResponse {
            status: status.as_u16(),
            body,
            task,
        })
    }

    async fn reauthenticate(&self) -> Result<(), RemoteError> {
        let url = self.url(&self.config.session_path);
        let response = self
            .client
            .post(&url)
            .header(ACCEPT, self.accept())
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteError::AuthenticationFailed(format!(
                "{} rejected credentials for {}",
                status, self.config.username
            )));
        }
        if !status.is_success() {
            return Err(Self::error_from(response).await);
        }

        let token = response
            .headers()
            .get(self.config.token_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                RemoteError::AuthenticationFailed(format!(
                    "session response carried no {} header",
                    self.config.token_header
                ))
            })?;

        *self.token.write().await = Some(token);
        info!(user = %self.config.username, "Session established");
        Ok(())
    }
}
