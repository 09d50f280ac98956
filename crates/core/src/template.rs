//! Templates: the content blueprint rendered once per payload item.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::TemplateId;

/// Template dialect.
///
/// The pipeline never interprets this itself; renderers may refuse dialects
/// they do not understand.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TemplateType {
    /// `${field}` expression templates.
    Jstl,
    /// Content emitted verbatim, no substitution.
    Plain,
}

impl TemplateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateType::Jstl => "JSTL",
            TemplateType::Plain => "PLAIN",
        }
    }
}

impl core::fmt::Display for TemplateType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "JSTL" => Ok(TemplateType::Jstl),
            "PLAIN" => Ok(TemplateType::Plain),
            other => Err(DomainError::validation(format!("unknown template type: {other}"))),
        }
    }
}

/// A template referenced by a batch.
///
/// Treated as immutable for the duration of a processing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: TemplateId,
    pub template_type: TemplateType,
    pub content: String,
}

impl Template {
    pub fn new(id: impl Into<TemplateId>, template_type: TemplateType, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            template_type,
            content: content.into(),
        }
    }
}
