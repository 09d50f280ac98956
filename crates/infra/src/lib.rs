//! Infrastructure layer: stores, renderers, the batch pipeline, queue trigger.

pub mod config;
pub mod errors;
pub mod pipeline;
pub mod queue;
pub mod render;
pub mod service;
pub mod store;
pub mod workers;


pub use config::{AppConfig, PipelineConfig, QueueTriggerConfig};
pub use errors::{BoundaryError, BoundaryErrorKind, PipelineError};
pub use pipeline::{BatchPipeline, BatchProcessor};
pub use render::{PlaceholderRenderer, RenderError, Rendered, TemplateRenderer};
pub use service::{BatchService, ServiceError};
pub use store::{BatchStore, InMemoryBatchStore, StoreError};
pub use workers::{QueueTrigger, QueueTriggerHandle, TriggerStats};
