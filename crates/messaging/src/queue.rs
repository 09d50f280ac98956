//! Message queue abstraction (mechanics only).
//!
//! The queue carries "process batch `<id>`" messages from producers (the API's
//! enqueue path) to the queue trigger worker.
//!
//! ## Delivery Guarantees
//!
//! Queues provide **at-least-once delivery**:
//! - A received message stays in flight until it is settled; one left
//!   unsettled past the visibility timeout is redelivered (with `attempt + 1`)
//! - A negatively acknowledged message is redelivered (with `attempt + 1`)
//! - After the configured delivery limit a message is dead-lettered instead
//! - Consumers must be idempotent (processing the same batch twice is safe)
//!
//! ## Usage Pattern
//!
//! ```ignore
//! let queue: Arc<dyn MessageQueue> = ...;
//!
//! loop {
//!     match queue.receive(Duration::from_millis(250)).await? {
//!         Some(delivery) => match handle(&delivery).await {
//!             Ok(()) => queue.ack(&delivery).await?,
//!             Err(_) => { queue.nack(&delivery).await?; }
//!         },
//!         None => continue, // idle tick: check for shutdown
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::message::{BatchMessage, Delivery};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Broker unreachable or connection dropped (retryable).
    #[error("queue connection error: {0}")]
    Connection(String),

    /// Broker rejected a command.
    #[error("queue command error: {0}")]
    Command(String),

    #[error("message encode error: {0}")]
    Encode(String),

    /// Message body is not a valid batch message.
    #[error("message decode error: {0}")]
    Decode(String),

    /// Ack/nack for a delivery that is not in flight (already settled or unknown).
    #[error("unknown delivery: {0}")]
    UnknownDelivery(String),

    /// Internal lock poisoning (in-memory implementation).
    #[error("queue state poisoned")]
    Poisoned,
}

/// What happened to a negatively acknowledged delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Scheduled for redelivery as attempt `next_attempt`.
    Requeued { next_attempt: u32 },
    /// Delivery limit reached; moved to the dead-letter list.
    DeadLettered { attempts: u32 },
}

/// Transport-agnostic work queue with explicit acknowledgment.
///
/// Implementations must be safe to share across tasks.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Append a raw message body.
    async fn publish_raw(&self, body: String) -> Result<(), QueueError>;

    /// Wait up to `timeout` for the next delivery; `Ok(None)` on an idle timeout.
    async fn receive(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Settle a delivery permanently.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Return a delivery for redelivery (or dead-letter it past the limit).
    async fn nack(&self, delivery: &Delivery) -> Result<NackOutcome, QueueError>;

    /// Publish a typed batch message.
    async fn publish(&self, message: &BatchMessage) -> Result<(), QueueError> {
        self.publish_raw(message.encode()?).await
    }
}

#[async_trait]
impl<Q> MessageQueue for Arc<Q>
where
    Q: MessageQueue + ?Sized,
{
    async fn publish_raw(&self, body: String) -> Result<(), QueueError> {
        (**self).publish_raw(body).await
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        (**self).receive(timeout).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        (**self).ack(delivery).await
    }

    async fn nack(&self, delivery: &Delivery) -> Result<NackOutcome, QueueError> {
        (**self).nack(delivery).await
    }
}
