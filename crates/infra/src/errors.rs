//! Pipeline error taxonomy and its mapping to boundary-facing errors.

use docgen_core::BatchId;

use crate::render::RenderError;
use crate::store::StoreError;

/// Error returned by every pipeline operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    /// No batch with this id exists. Permanent; never retried.
    #[error("Batch not found with ID: {0}")]
    NotFound(BatchId),

    /// Rendering payload item `index` failed; the run was aborted.
    #[error("render failed for payload item {index}: {cause}")]
    RenderFailure { index: usize, cause: RenderError },

    /// The store could not be reached; the batch state is unknown.
    #[error("batch store unavailable: {0}")]
    TransientStoreFailure(String),

    /// Any other (non-transient) store failure.
    #[error("batch store error: {0}")]
    Store(String),
}

impl PipelineError {
    /// Whether redelivering the triggering message could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::TransientStoreFailure(_))
    }

    /// Map to the error a client is allowed to see.
    pub fn boundary(&self) -> BoundaryError {
        match self {
            PipelineError::NotFound(id) => BoundaryError::not_found(id),
            _ => BoundaryError::internal(),
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => PipelineError::NotFound(id),
            StoreError::Unavailable(msg) => PipelineError::TransientStoreFailure(msg),
            other => PipelineError::Store(other.to_string()),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BoundaryErrorKind {
    /// 404-equivalent.
    NotFound,
    /// Opaque server-side failure.
    Internal,
}

/// Transport-agnostic error surfaced to clients.
///
/// Internal causes are never included in the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryError {
    pub kind: BoundaryErrorKind,
    pub message: String,
}

impl BoundaryError {
    pub fn not_found(id: &BatchId) -> Self {
        Self {
            kind: BoundaryErrorKind::NotFound,
            message: format!("Batch not found with ID: {id}"),
        }
    }

    pub fn internal() -> Self {
        Self {
            kind: BoundaryErrorKind::Internal,
            message: "Internal server error".to_string(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self.kind {
            BoundaryErrorKind::NotFound => 404,
            BoundaryErrorKind::Internal => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self.kind {
            BoundaryErrorKind::NotFound => "not_found",
            BoundaryErrorKind::Internal => "internal_error",
        }
    }
}
