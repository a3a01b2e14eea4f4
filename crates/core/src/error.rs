// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Remote call error: {0}")]
    Remote(#[from] crate::port::RemoteError),

    /// Terminal failure reported by the platform for an async task (message verbatim)
    #[error("Remote operation failed: {0}")]
    RemoteOperationFailed(String),

    /// Stopped waiting for a task; its remote outcome is unknown
    #[error("Timed out after {waited_ms}ms waiting for task {task}")]
    Timeout { task: String, waited_ms: u64 },

    #[error("Unit {unit} aborted: a sibling unit failed (barrier: {barrier})")]
    SiblingFailed { unit: String, barrier: String },

    #[error("Lock on {resource} not acquired within {waited_ms}ms")]
    LockTimeout { resource: String, waited_ms: u64 },

    #[error("Batch step {step} failed for {failed} of {total} items: {first_error}")]
    BatchFailed {
        step: String,
        failed: usize,
        total: usize,
        first_error: String,
    },

    #[error("Run interrupted before step {0}")]
    Interrupted(String),

    #[error("Step {0} has no reverse action")]
    NotReversible(String),

    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for errors raised because another unit failed, not by this unit's own work
    pub fn is_sibling_failure(&self) -> bool {
        matches!(self, AppError::SiblingFailed { .. })
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in infra-sqlite crate
// by converting to AppError::Checkpoint(String)
