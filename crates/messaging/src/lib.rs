//! Batch-processing queue mechanics (transport-agnostic).

pub mod in_memory_queue;
pub mod message;
pub mod queue;

pub use in_memory_queue::InMemoryQueue;
pub use message::{BatchMessage, DeadLetter, Delivery, DeliveryId};
pub use queue::{MessageQueue, NackOutcome, QueueError};
