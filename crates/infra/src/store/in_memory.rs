//! In-memory batch store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use docgen_core::{Batch, BatchId, BatchUpdate, NewBatch};

use super::{BatchStore, StoreError};

/// In-memory batch store.
///
/// Updates are applied under a single write lock, so output and status are
/// always committed together.
#[derive(Debug, Default)]
pub struct InMemoryBatchStore {
    batches: RwLock<HashMap<BatchId, Batch>>,
}

impl InMemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.batches.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> StoreError {
        StoreError::Storage("in-memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl BatchStore for InMemoryBatchStore {
    async fn find_by_id(&self, id: &BatchId) -> Result<Batch, StoreError> {
        let batches = self.batches.read().map_err(|_| Self::poisoned())?;
        batches
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn find_all(&self) -> Result<Vec<Batch>, StoreError> {
        let batches = self.batches.read().map_err(|_| Self::poisoned())?;
        let mut all: Vec<_> = batches.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn update(&self, id: &BatchId, update: BatchUpdate) -> Result<Batch, StoreError> {
        let mut batches = self.batches.write().map_err(|_| Self::poisoned())?;
        let batch = batches
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        batch.apply(&update)?;
        Ok(batch.clone())
    }

    async fn delete(&self, id: &BatchId) -> Result<Batch, StoreError> {
        let mut batches = self.batches.write().map_err(|_| Self::poisoned())?;
        batches
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn insert(&self, mut new: NewBatch) -> Result<Batch, StoreError> {
        let id = new.id.take().unwrap_or_default();
        let mut batches = self.batches.write().map_err(|_| Self::poisoned())?;
        if batches.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        let batch = Batch::create(id.clone(), new);
        batches.insert(id, batch.clone());
        Ok(batch)
    }
}
