//! Domain error model.

use thiserror::Error;

use crate::batch::BatchStatus;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic failures (validation, lifecycle rules).
/// Storage and transport concerns belong to the infra layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. empty string).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A batch status change would move the lifecycle backwards or out of a terminal state.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: BatchStatus, to: BatchStatus },

    /// Output length does not match the payload length.
    #[error("output has {output} entries but payload has {payload}")]
    OutputMismatch { payload: usize, output: usize },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
