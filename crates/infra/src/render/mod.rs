//! Template rendering capability.
//!
//! The pipeline treats rendering as opaque: one template + one payload item in,
//! one rendered string out. Implementations may be local or remote.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use docgen_core::{PayloadItem, Template};

pub mod placeholder;

pub use placeholder::PlaceholderRenderer;

/// Output of a single render call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub processed: String,
}

impl Rendered {
    pub fn new(processed: impl Into<String>) -> Self {
        Self {
            processed: processed.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// The template references a field the payload item does not carry.
    #[error("missing field `{0}` in payload item")]
    MissingField(String),

    /// The render call did not complete in time.
    #[error("render timed out after {0:?}")]
    Timeout(Duration),

    /// Engine-specific failure.
    #[error("render engine error: {0}")]
    Engine(String),
}

/// Renders one payload item against one template.
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render_template(
        &self,
        template: &Template,
        item: &PayloadItem,
    ) -> Result<Rendered, RenderError>;
}

#[async_trait]
impl<R> TemplateRenderer for Arc<R>
where
    R: TemplateRenderer + ?Sized,
{
    async fn render_template(
        &self,
        template: &Template,
        item: &PayloadItem,
    ) -> Result<Rendered, RenderError> {
        (**self).render_template(template, item).await
    }
}
