//! `${field}` substitution renderer.

use std::borrow::Cow;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde_json::Value;

use docgen_core::{PayloadItem, Template, TemplateType};

use super::{RenderError, Rendered, TemplateRenderer};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*\}")
        .expect("placeholder pattern is valid")
});

/// Default local renderer.
///
/// - `JSTL` templates: each `${path}` is replaced by the payload value at
///   `path` (dotted paths walk nested objects/arrays). Strings are inserted
///   verbatim, `null` as an empty string, everything else as JSON text.
/// - `PLAIN` templates: content is returned unchanged.
///
/// A placeholder whose path is absent from the payload fails the render.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer;

impl PlaceholderRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous render (the async trait impl delegates here).
    pub fn render(&self, template: &Template, item: &PayloadItem) -> Result<String, RenderError> {
        match template.template_type {
            TemplateType::Plain => Ok(template.content.clone()),
            TemplateType::Jstl => substitute(&template.content, item),
        }
    }
}

fn substitute(content: &str, item: &PayloadItem) -> Result<String, RenderError> {
    let mut missing: Option<String> = None;

    let rendered = PLACEHOLDER.replace_all(content, |caps: &Captures<'_>| {
        let path = &caps[1];
        match item.get_path(path) {
            Some(value) => value_to_text(value),
            None => {
                missing.get_or_insert_with(|| path.to_string());
                Cow::Borrowed("")
            }
        }
    });

    match missing {
        Some(path) => Err(RenderError::MissingField(path)),
        None => Ok(rendered.into_owned()),
    }
}

fn value_to_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        Value::Null => Cow::Borrowed(""),
        other => Cow::Owned(other.to_string()),
    }
}

#[async_trait]
impl TemplateRenderer for PlaceholderRenderer {
    async fn render_template(
        &self,
        template: &Template,
        item: &PayloadItem,
    ) -> Result<Rendered, RenderError> {
        self.render(template, item).map(Rendered::new)
    }
}
