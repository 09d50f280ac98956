use std::sync::Arc;

use docgen_infra::config::AppConfig;
use docgen_infra::pipeline::BatchPipeline;
use docgen_infra::render::{PlaceholderRenderer, TemplateRenderer};
use docgen_infra::service::BatchService;
use docgen_infra::store::{BatchStore, InMemoryBatchStore};
use docgen_infra::workers::{QueueTrigger, QueueTriggerHandle};
use docgen_messaging::{InMemoryQueue, MessageQueue};

pub type DynBatchService = BatchService<Arc<dyn BatchStore>, Arc<dyn TemplateRenderer>>;

/// Services shared by all handlers.
pub struct AppServices {
    pub batches: DynBatchService,
}

pub struct Wiring {
    pub services: Arc<AppServices>,
    pub trigger: QueueTriggerHandle,
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<Wiring> {
    if config.use_persistent_stores {
        #[cfg(feature = "persistent")]
        {
            return build_persistent_services(config).await;
        }
        #[cfg(not(feature = "persistent"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but persistent feature not enabled, falling back to in-memory"
            );
        }
    }

    Ok(build_in_memory_services(config))
}

/// In-memory wiring (dev/test): store + queue, no external services.
pub fn build_in_memory_services(config: &AppConfig) -> Wiring {
    let store: Arc<dyn BatchStore> = InMemoryBatchStore::arc();
    let queue: Arc<dyn MessageQueue> = Arc::new(
        InMemoryQueue::with_max_deliveries(config.queue_max_deliveries)
            .with_visibility_timeout(config.queue_visibility_timeout),
    );
    wire(config, store, queue)
}

/// Postgres store + Redis Streams queue.
#[cfg(feature = "persistent")]
async fn build_persistent_services(config: &AppConfig) -> anyhow::Result<Wiring> {
    use anyhow::Context;
    use docgen_infra::queue::RedisStreamsQueue;
    use docgen_infra::store::PostgresBatchStore;

    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;

    let store = PostgresBatchStore::connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    let consumer = format!("docgen-api-{}", uuid::Uuid::now_v7());
    let queue = RedisStreamsQueue::connect(
        &config.redis_url,
        config.queue_key.clone(),
        consumer,
        config.queue_max_deliveries,
        config.queue_visibility_timeout,
    )
    .await
    .context("failed to connect to Redis")?;

    tracing::info!(
        stream_key = %queue.stream_key(),
        dlq_key = %queue.dlq_key(),
        "using persistent stores"
    );
    Ok(wire(config, Arc::new(store), Arc::new(queue)))
}

fn wire(config: &AppConfig, store: Arc<dyn BatchStore>, queue: Arc<dyn MessageQueue>) -> Wiring {
    let renderer: Arc<dyn TemplateRenderer> = Arc::new(PlaceholderRenderer::new());
    let pipeline =
        Arc::new(BatchPipeline::new(store, renderer).with_config(config.pipeline.clone()));

    let trigger = QueueTrigger::new(queue.clone(), pipeline.clone()).spawn(config.trigger.clone());

    Wiring {
        services: Arc::new(AppServices {
            batches: BatchService::new(pipeline, queue),
        }),
        trigger,
    }
}
