//! Batch processing pipeline (application-level orchestration).
//!
//! The pipeline turns a `pending` batch into a `done` one by rendering its
//! template once per payload item:
//!
//! ```text
//! process(id)
//!   ↓
//! 1. Load batch + template + payload from the store
//!   ↓
//! 2. Render every payload item (bounded concurrency, order preserved)
//!   ↓
//! 3a. All renders succeeded → one update { output, status: done }
//! 3b. A render failed       → one update { status: failed }, error returned
//! ```
//!
//! ## Guarantees
//!
//! - `output[i]` is the rendering of `payload[i]` whatever the completion order
//! - Output and status are committed by a single store update; a `done` batch
//!   never carries stale or partial output
//! - No batch state is kept between invocations, so redelivered triggers simply
//!   reload and redo the work
//!
//! ## Re-processing
//!
//! | Current status | `process` does |
//! |----------------|----------------|
//! | `pending`, `processing` | Full run |
//! | `done` | Full redo; identical output is rewritten |
//! | `failed` | Nothing; the batch is returned unchanged |

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{FuturesOrdered, StreamExt};
use tracing::{debug, error, info, instrument, warn};

use docgen_core::{Batch, BatchId, BatchStatus, BatchUpdate, PayloadItem, Template};

use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::render::{RenderError, TemplateRenderer};
use crate::store::BatchStore;

/// Something that can process a batch by id.
///
/// The queue trigger depends on this rather than on a concrete pipeline so it
/// can be driven by test doubles.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(&self, id: &BatchId) -> Result<Batch, PipelineError>;
}

#[async_trait]
impl<P> BatchProcessor for Arc<P>
where
    P: BatchProcessor + ?Sized,
{
    async fn process(&self, id: &BatchId) -> Result<Batch, PipelineError> {
        (**self).process(id).await
    }
}

/// Batch pipeline over a store and a renderer.
///
/// Cheap to share behind an `Arc`; holds no per-batch state.
#[derive(Debug)]
pub struct BatchPipeline<S, R> {
    store: S,
    renderer: R,
    config: PipelineConfig,
}

impl<S, R> BatchPipeline<S, R>
where
    S: BatchStore,
    R: TemplateRenderer,
{
    pub fn new(store: S, renderer: R) -> Self {
        Self {
            store,
            renderer,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Render every payload item and commit the result.
    ///
    /// On a render failure the batch is marked `failed` (without output) before
    /// the error is returned.
    #[instrument(skip(self), fields(batch_id = %id))]
    pub async fn process(&self, id: &BatchId) -> Result<Batch, PipelineError> {
        let batch = self.store.find_by_id(id).await?;

        if batch.status == BatchStatus::Failed {
            warn!(batch_id = %id, "batch already failed; skipping");
            return Ok(batch);
        }

        let started = Instant::now();
        match self.render_all(&batch).await {
            Ok(output) => {
                let items = output.len();
                let updated = self.store.update(id, BatchUpdate::completed(output)).await?;
                info!(
                    batch_id = %id,
                    items,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "batch processed"
                );
                Ok(updated)
            }
            Err(err) => {
                warn!(batch_id = %id, error = %err, "batch render failed");
                self.mark_failed(&batch).await?;
                Err(err)
            }
        }
    }

    /// Load one batch.
    #[instrument(skip(self), fields(batch_id = %id))]
    pub async fn get(&self, id: &BatchId) -> Result<Batch, PipelineError> {
        Ok(self.store.find_by_id(id).await?)
    }

    /// Load every batch; an empty store yields an empty list.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<Batch>, PipelineError> {
        let batches = self.store.find_all().await?;
        debug!(count = batches.len(), "listed batches");
        Ok(batches)
    }

    /// Delete a batch, returning its last snapshot.
    #[instrument(skip(self), fields(batch_id = %id))]
    pub async fn remove(&self, id: &BatchId) -> Result<Batch, PipelineError> {
        let removed = self.store.delete(id).await?;
        info!(batch_id = %id, status = %removed.status, "batch removed");
        Ok(removed)
    }

    async fn render_all(&self, batch: &Batch) -> Result<Vec<String>, PipelineError> {
        let limit = self.config.render_concurrency.max(1);
        let mut items = batch.payload.iter().enumerate();
        let mut in_flight = FuturesOrdered::new();
        let mut output = Vec::with_capacity(batch.payload.len());

        // `FuturesOrdered` yields in push order regardless of completion order.
        loop {
            while in_flight.len() < limit {
                match items.next() {
                    Some((index, item)) => {
                        in_flight.push_back(self.render_one(&batch.template, index, item))
                    }
                    None => break,
                }
            }

            match in_flight.next().await {
                Some(rendered) => output.push(rendered?),
                None => break,
            }
        }

        Ok(output)
    }

    async fn render_one(
        &self,
        template: &Template,
        index: usize,
        item: &PayloadItem,
    ) -> Result<String, PipelineError> {
        let rendered = match self.config.render_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.renderer.render_template(template, item)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(RenderError::Timeout(limit)),
                }
            }
            None => self.renderer.render_template(template, item).await,
        };

        rendered
            .map(|r| r.processed)
            .map_err(|cause| PipelineError::RenderFailure { index, cause })
    }

    /// Record a failed run. Status only; partial output is never written.
    async fn mark_failed(&self, batch: &Batch) -> Result<(), PipelineError> {
        if batch.status == BatchStatus::Done {
            // A failed redo leaves the earlier complete output in place.
            warn!(batch_id = %batch.id, "redo of done batch failed; keeping previous output");
            return Ok(());
        }

        match self.store.update(&batch.id, BatchUpdate::failed()).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_transient() => Err(err.into()),
            Err(err) => {
                // The render failure is still returned; the record keeps its prior status.
                error!(batch_id = %batch.id, error = %err, "could not mark batch failed");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<S, R> BatchProcessor for BatchPipeline<S, R>
where
    S: BatchStore,
    R: TemplateRenderer,
{
    async fn process(&self, id: &BatchId) -> Result<Batch, PipelineError> {
        BatchPipeline::process(self, id).await
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;

    use docgen_core::{NewBatch, PayloadItem};

    use super::test_support::*;
    use super::*;
    use crate::render::PlaceholderRenderer;
    use crate::store::StoreError;

    fn pipeline(
        store: Arc<RecordingStore>,
    ) -> BatchPipeline<Arc<RecordingStore>, Arc<ScriptedRenderer>> {
        BatchPipeline::new(store, Arc::new(ScriptedRenderer::default()))
    }

    #[tokio::test]
    async fn process_writes_output_and_done_in_one_update() {
        let store = Arc::new(RecordingStore::default());
        store.insert(new_batch("test", &["content"])).await.unwrap();
        let pipeline = pipeline(store.clone());
        let id = BatchId::from("test");

        let batch = pipeline.process(&id).await.unwrap();

        assert_eq!(
            store.recorded(),
            vec![(
                id.clone(),
                BatchUpdate {
                    output: Some(vec!["content".to_string()]),
                    status: Some(BatchStatus::Done),
                }
            )]
        );
        assert_eq!(batch.output, vec!["content"]);
        assert_eq!(batch.status, BatchStatus::Done);
    }

    #[tokio::test]
    async fn placeholder_renderer_end_to_end() {
        let store = Arc::new(RecordingStore::default());
        store
            .insert(new_batch("b", &["alpha", "beta", "gamma"]))
            .await
            .unwrap();
        let pipeline = BatchPipeline::new(store.clone(), PlaceholderRenderer::new());

        let batch = pipeline.process(&BatchId::from("b")).await.unwrap();
        assert_eq!(batch.output, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found_without_mutation() {
        let store = Arc::new(RecordingStore::default());
        let pipeline = pipeline(store.clone());
        let id = BatchId::from("missing");

        for result in [
            pipeline.process(&id).await,
            pipeline.get(&id).await,
            pipeline.remove(&id).await,
        ] {
            let err = result.unwrap_err();
            assert!(matches!(err, PipelineError::NotFound(ref got) if *got == id));
            assert_eq!(err.to_string(), "Batch not found with ID: missing");
        }
        assert!(store.recorded().is_empty());
    }

    #[tokio::test]
    async fn list_on_empty_store_is_empty() {
        let pipeline = pipeline(Arc::new(RecordingStore::default()));
        assert!(pipeline.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_returns_current_record() {
        let store = Arc::new(RecordingStore::default());
        let created = store.insert(new_batch("b", &["x"])).await.unwrap();
        let pipeline = pipeline(store);

        let got = pipeline.get(&BatchId::from("b")).await.unwrap();
        assert_eq!(got, created);
        assert_eq!(pipeline.list().await.unwrap(), vec![created]);
    }

    #[tokio::test]
    async fn processing_twice_yields_identical_output() {
        let store = Arc::new(RecordingStore::default());
        store.insert(new_batch("b", &["one", "two"])).await.unwrap();
        let pipeline = pipeline(store.clone());
        let id = BatchId::from("b");

        let first = pipeline.process(&id).await.unwrap();
        let second = pipeline.process(&id).await.unwrap();

        assert_eq!(first.output, second.output);
        assert_eq!(second.status, BatchStatus::Done);
        assert_eq!(store.recorded().len(), 2);
    }

    #[tokio::test]
    async fn remove_returns_snapshot_then_not_found() {
        let store = Arc::new(RecordingStore::default());
        store.insert(new_batch("b", &["x"])).await.unwrap();
        let pipeline = pipeline(store);
        let id = BatchId::from("b");

        let processed = pipeline.process(&id).await.unwrap();
        let removed = pipeline.remove(&id).await.unwrap();
        assert_eq!(removed, processed);

        assert!(matches!(
            pipeline.get(&id).await,
            Err(PipelineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn empty_payload_completes_with_empty_output() {
        let store = Arc::new(RecordingStore::default());
        store.insert(new_batch("b", &[])).await.unwrap();
        let pipeline = pipeline(store);

        let batch = pipeline.process(&BatchId::from("b")).await.unwrap();
        assert!(batch.output.is_empty());
        assert_eq!(batch.status, BatchStatus::Done);
    }

    #[tokio::test]
    async fn caller_set_processing_status_is_accepted() {
        let store = Arc::new(RecordingStore::default());
        store.insert(new_batch("b", &["x"])).await.unwrap();
        let id = BatchId::from("b");
        store
            .inner
            .update(&id, BatchUpdate::status(BatchStatus::Processing))
            .await
            .unwrap();

        let batch = pipeline(store).process(&id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Done);
    }

    #[tokio::test]
    async fn render_failure_marks_failed_without_output() {
        let store = Arc::new(RecordingStore::default());
        let payload = vec![
            PayloadItem::new().with("content", "ok"),
            PayloadItem::new().with("fail", true),
            PayloadItem::new().with("content", "never written"),
        ];
        store
            .insert(NewBatch::new(jstl_template(), payload).with_id("b"))
            .await
            .unwrap();
        let pipeline = pipeline(store.clone());
        let id = BatchId::from("b");

        let err = pipeline.process(&id).await.unwrap_err();
        assert!(matches!(err, PipelineError::RenderFailure { index: 1, .. }));

        assert_eq!(store.recorded(), vec![(id.clone(), BatchUpdate::failed())]);
        let batch = pipeline.get(&id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert!(batch.output.is_empty());
    }

    #[tokio::test]
    async fn failed_batch_is_left_unchanged() {
        let store = Arc::new(RecordingStore::default());
        store.insert(new_batch("b", &["x"])).await.unwrap();
        let id = BatchId::from("b");
        store.inner.update(&id, BatchUpdate::failed()).await.unwrap();
        let renderer = Arc::new(ScriptedRenderer::default());
        let pipeline = BatchPipeline::new(store.clone(), renderer.clone());

        let batch = pipeline.process(&id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(renderer.calls(), 0);
        assert!(store.recorded().is_empty());
    }

    #[tokio::test]
    async fn render_timeout_is_a_render_failure() {
        let store = Arc::new(RecordingStore::default());
        let payload = vec![PayloadItem::new().with("content", "slow").with("delay_ms", 500)];
        store
            .insert(NewBatch::new(jstl_template(), payload).with_id("b"))
            .await
            .unwrap();
        let pipeline = pipeline(store.clone()).with_config(
            PipelineConfig::default().with_render_timeout(Some(Duration::from_millis(20))),
        );
        let id = BatchId::from("b");

        let err = pipeline.process(&id).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::RenderFailure {
                index: 0,
                cause: RenderError::Timeout(_)
            }
        ));
        assert_eq!(pipeline.get(&id).await.unwrap().status, BatchStatus::Failed);
    }

    #[tokio::test]
    async fn transient_store_failures_are_classified() {
        let store = Arc::new(RecordingStore::default());
        store.insert(new_batch("b", &["x"])).await.unwrap();
        let pipeline = pipeline(store.clone());
        let id = BatchId::from("b");

        store.fail_finds_with(Some(StoreError::Unavailable("pool timed out".into())));
        let err = pipeline.process(&id).await.unwrap_err();
        assert!(err.is_transient());

        store.fail_finds_with(None);
        store.fail_updates_with(Some(StoreError::Unavailable("connection reset".into())));
        let err = pipeline.process(&id).await.unwrap_err();
        assert!(matches!(err, PipelineError::TransientStoreFailure(_)));
        assert_eq!(pipeline.get(&id).await.unwrap().status, BatchStatus::Pending);
    }

    #[tokio::test]
    async fn unreachable_store_while_marking_failed_is_transient() {
        let store = Arc::new(RecordingStore::default());
        let payload = vec![PayloadItem::new().with("fail", true)];
        store
            .insert(NewBatch::new(jstl_template(), payload).with_id("b"))
            .await
            .unwrap();
        store.fail_updates_with(Some(StoreError::Unavailable("down".into())));

        let err = pipeline(store).process(&BatchId::from("b")).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn permanent_store_error_while_marking_failed_returns_render_failure() {
        let store = Arc::new(RecordingStore::default());
        let payload = vec![PayloadItem::new().with("fail", true)];
        store
            .insert(NewBatch::new(jstl_template(), payload).with_id("b"))
            .await
            .unwrap();
        store.fail_updates_with(Some(StoreError::Storage("check constraint violated".into())));

        let id = BatchId::from("b");
        let err = pipeline(store.clone()).process(&id).await.unwrap_err();
        assert!(matches!(err, PipelineError::RenderFailure { index: 0, .. }));
        assert!(!err.is_transient());

        let batch = store.inner.find_by_id(&id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Pending);
        assert!(batch.output.is_empty());
    }

    #[tokio::test]
    async fn failed_redo_of_done_batch_keeps_output() {
        let store = Arc::new(RecordingStore::default());
        store.insert(new_batch("b", &["x"])).await.unwrap();
        let id = BatchId::from("b");
        store
            .inner
            .update(&id, BatchUpdate::completed(vec!["previous".into()]))
            .await
            .unwrap();

        let pipeline = BatchPipeline::new(store.clone(), FailingRenderer);
        let err = pipeline.process(&id).await.unwrap_err();
        assert!(matches!(err, PipelineError::RenderFailure { .. }));

        let batch = pipeline.get(&id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Done);
        assert_eq!(batch.output, vec!["previous"]);
        assert!(store.recorded().is_empty());
    }

    struct FailingRenderer;

    #[async_trait]
    impl TemplateRenderer for FailingRenderer {
        async fn render_template(
            &self,
            _template: &docgen_core::Template,
            _item: &PayloadItem,
        ) -> Result<crate::render::Rendered, RenderError> {
            Err(RenderError::Engine("engine offline".into()))
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn output_order_matches_payload_order(
            delays in prop::collection::vec(0u64..4, 0..24),
            concurrency in 1usize..8,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();

            let expected: Vec<String> = (0..delays.len()).map(|i| format!("item-{i}")).collect();
            let payload: Vec<PayloadItem> = delays
                .iter()
                .enumerate()
                .map(|(i, ms)| {
                    PayloadItem::new()
                        .with("content", format!("item-{i}"))
                        .with("delay_ms", *ms)
                })
                .collect();

            let output = rt.block_on(async {
                let store = Arc::new(RecordingStore::default());
                store
                    .insert(NewBatch::new(jstl_template(), payload).with_id("p"))
                    .await
                    .unwrap();
                let pipeline = pipeline(store).with_config(
                    PipelineConfig::default().with_render_concurrency(concurrency),
                );
                pipeline.process(&BatchId::from("p")).await.unwrap().output
            });

            prop_assert_eq!(output, expected);
        }
    }
}
