// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Overlapping ranges in a pool. Never expected from correct code.
    #[error("Interval violation: {0}")]
    IntervalViolation(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Unknown step: {0}")]
    UnknownStep(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
