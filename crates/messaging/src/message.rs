//! Queue message shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docgen_core::BatchId;

use crate::queue::QueueError;

/// Inbound "process this batch" message.
///
/// Wire shape is `{"id": "<batch id>"}`; unknown fields are ignored so
/// producers may attach metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMessage {
    pub id: BatchId,
}

impl BatchMessage {
    pub fn new(id: impl Into<BatchId>) -> Self {
        Self { id: id.into() }
    }

    pub fn encode(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::Encode(e.to_string()))
    }

    pub fn decode(body: &str) -> Result<Self, QueueError> {
        serde_json::from_str(body).map_err(|e| QueueError::Decode(e.to_string()))
    }
}

/// Transport-assigned identifier of one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(pub String);

impl core::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A received message awaiting ack/nack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: DeliveryId,
    /// Raw message body (JSON text).
    pub body: String,
    /// 1 on first delivery, incremented on each redelivery.
    pub attempt: u32,
}

impl Delivery {
    pub fn decode(&self) -> Result<BatchMessage, QueueError> {
        BatchMessage::decode(&self.body)
    }
}

/// A message that exhausted its deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub body: String,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}
