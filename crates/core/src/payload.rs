//! Payload items: one set of substitution values per rendered document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DomainError;

/// An opaque mapping of field names to values, consumed by renderers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadItem(Map<String, Value>);

impl PayloadItem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insert (mostly for tests and fixtures).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up a dotted path (`customer.address.city`) through nested objects.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl TryFrom<Value> for PayloadItem {
    type Error = DomainError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(DomainError::validation(format!(
                "payload item must be a JSON object, got {other}"
            ))),
        }
    }
}

impl From<PayloadItem> for Value {
    fn from(item: PayloadItem) -> Self {
        Value::Object(item.0)
    }
}
