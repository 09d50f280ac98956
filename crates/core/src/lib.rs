//! `docgen-core`: document generation domain building blocks.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! templates, payload items, batches and the batch status lifecycle.

pub mod batch;
pub mod error;
pub mod id;
pub mod payload;
pub mod template;

pub use batch::{Batch, BatchStatus, BatchUpdate, NewBatch};
pub use error::{DomainError, DomainResult};
pub use id::{BatchId, TemplateId};
pub use payload::PayloadItem;
pub use template::{Template, TemplateType};
