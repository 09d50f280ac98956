//! Broker-backed `MessageQueue` implementations.
//!
//! The queue abstraction and the in-memory implementation live in
//! `docgen-messaging`; this module adds Redis.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsQueue;
