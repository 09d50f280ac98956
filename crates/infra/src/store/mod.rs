//! Batch persistence abstraction.
//!
//! The pipeline only needs load / list / update / delete by id (plus `insert`
//! for the creating side). Every operation reports "not found" distinctly from
//! availability problems so callers can map them to different outcomes.

use std::sync::Arc;

use async_trait::async_trait;

use docgen_core::{Batch, BatchId, BatchUpdate, DomainError, NewBatch};

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::InMemoryBatchStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresBatchStore;

/// Batch store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("batch not found: {0}")]
    NotFound(BatchId),

    #[error("batch already exists: {0}")]
    AlreadyExists(BatchId),

    /// The update violates the batch lifecycle or output invariants.
    #[error("update rejected: {0}")]
    Rejected(#[from] DomainError),

    /// Connectivity / availability failure; the operation may succeed if retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Any other storage failure (decode, constraint, query).
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Batch store abstraction.
///
/// Loads always include the batch's template and full payload.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Load one batch.
    async fn find_by_id(&self, id: &BatchId) -> Result<Batch, StoreError>;

    /// Load every batch (empty is not an error).
    async fn find_all(&self) -> Result<Vec<Batch>, StoreError>;

    /// Apply a partial update as a single atomic write and return the new record.
    async fn update(&self, id: &BatchId, update: BatchUpdate) -> Result<Batch, StoreError>;

    /// Remove a batch, returning its last snapshot.
    async fn delete(&self, id: &BatchId) -> Result<Batch, StoreError>;

    /// Create a `pending` batch.
    async fn insert(&self, new: NewBatch) -> Result<Batch, StoreError>;
}

#[async_trait]
impl<S> BatchStore for Arc<S>
where
    S: BatchStore + ?Sized,
{
    async fn find_by_id(&self, id: &BatchId) -> Result<Batch, StoreError> {
        (**self).find_by_id(id).await
    }

    async fn find_all(&self) -> Result<Vec<Batch>, StoreError> {
        (**self).find_all().await
    }

    async fn update(&self, id: &BatchId, update: BatchUpdate) -> Result<Batch, StoreError> {
        (**self).update(id, update).await
    }

    async fn delete(&self, id: &BatchId) -> Result<Batch, StoreError> {
        (**self).delete(id).await
    }

    async fn insert(&self, new: NewBatch) -> Result<Batch, StoreError> {
        (**self).insert(new).await
    }
}
