use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use docgen_core::{BatchId, NewBatch, PayloadItem, Template};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBatchRequest {
    /// Client-chosen id; generated when absent.
    pub id: Option<String>,
    pub template: Template,
    #[serde(default)]
    pub payload: Vec<PayloadItem>,
}

impl CreateBatchRequest {
    pub fn into_new_batch(self) -> Result<NewBatch, axum::response::Response> {
        let mut new = NewBatch::new(self.template, self.payload);
        if let Some(id) = self.id {
            new.id = Some(parse_batch_id(&id)?);
        }
        Ok(new)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub id: BatchId,
    pub queued: bool,
}

pub fn parse_batch_id(raw: &str) -> Result<BatchId, axum::response::Response> {
    raw.parse::<BatchId>()
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}
