//! Application service used by the HTTP layer.
//!
//! Wraps the pipeline (synchronous processing and reads) and the work queue
//! (asynchronous processing). Creation goes straight to the store.

use std::sync::Arc;

use tracing::{info, instrument};

use docgen_core::{Batch, BatchId, NewBatch};
use docgen_messaging::{BatchMessage, MessageQueue, QueueError};

use crate::errors::PipelineError;
use crate::pipeline::BatchPipeline;
use crate::render::TemplateRenderer;
use crate::store::{BatchStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("batch already exists: {0}")]
    AlreadyExists(BatchId),

    /// Publishing the processing request failed; nothing was enqueued.
    #[error("enqueue failed: {0}")]
    Queue(#[from] QueueError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists(id) => ServiceError::AlreadyExists(id),
            other => ServiceError::Pipeline(other.into()),
        }
    }
}

/// Batch operations exposed to clients.
pub struct BatchService<S, R> {
    pipeline: Arc<BatchPipeline<S, R>>,
    queue: Arc<dyn MessageQueue>,
}

impl<S, R> Clone for BatchService<S, R> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            queue: self.queue.clone(),
        }
    }
}

impl<S, R> BatchService<S, R>
where
    S: BatchStore,
    R: TemplateRenderer,
{
    pub fn new(pipeline: Arc<BatchPipeline<S, R>>, queue: Arc<dyn MessageQueue>) -> Self {
        Self { pipeline, queue }
    }

    /// Store a new `pending` batch.
    #[instrument(skip(self, new))]
    pub async fn create(&self, new: NewBatch) -> Result<Batch, ServiceError> {
        let batch = self.pipeline.store().insert(new).await?;
        info!(batch_id = %batch.id, items = batch.payload.len(), "batch created");
        Ok(batch)
    }

    /// Request asynchronous processing.
    ///
    /// The batch must exist; the message is published and the call returns
    /// without waiting for the worker.
    #[instrument(skip(self), fields(batch_id = %id))]
    pub async fn enqueue(&self, id: &BatchId) -> Result<(), ServiceError> {
        self.pipeline.get(id).await?;
        self.queue.publish(&BatchMessage::new(id.clone())).await?;
        info!(batch_id = %id, "batch enqueued");
        Ok(())
    }

    /// Process synchronously and return the updated batch.
    pub async fn process(&self, id: &BatchId) -> Result<Batch, ServiceError> {
        Ok(self.pipeline.process(id).await?)
    }

    pub async fn get(&self, id: &BatchId) -> Result<Batch, ServiceError> {
        Ok(self.pipeline.get(id).await?)
    }

    pub async fn list(&self) -> Result<Vec<Batch>, ServiceError> {
        Ok(self.pipeline.list().await?)
    }

    pub async fn remove(&self, id: &BatchId) -> Result<Batch, ServiceError> {
        Ok(self.pipeline.remove(id).await?)
    }
}
