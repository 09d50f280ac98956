//! Redis Streams-backed work queue (durable, at-least-once delivery).
//!
//! ## Layout
//!
//! - **Stream key**: `docgen:batches` by default; one entry per message with
//!   fields `body` (JSON text) and `deliveries` (attempt number)
//! - **Consumer group**: shared by all trigger workers; each entry goes to one
//!   consumer
//! - **Dead-letter stream**: `<stream key>:dlq`
//!
//! ## Settlement
//!
//! - `ack`: `XACK`
//! - `nack`: in one `MULTI`/`EXEC`, re-`XADD` the body with `deliveries + 1`
//!   (or `XADD` it to the dead-letter stream once the limit is reached) and
//!   `XACK` the original entry
//!
//! ## Reclaiming
//!
//! An entry read but never settled (crashed consumer, failed ack/nack) stays
//! in the group's pending list. Before reading new entries, `receive` looks
//! for pending entries idle longer than the visibility timeout and `XCLAIM`s
//! them for this consumer; their attempt number counts every earlier read.
//! Reclaimed entries past the delivery limit go to the dead-letter stream.
//!
//! Receiving uses a dedicated connection because `XREADGROUP … BLOCK` holds
//! its connection until it returns.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, RedisError};
use tracing::{debug, instrument, warn};

use docgen_messaging::{Delivery, DeliveryId, MessageQueue, NackOutcome, QueueError};

/// Default consumer group name.
pub const DEFAULT_GROUP: &str = "docgen.batch-trigger";

/// Pending entries inspected per reclaim pass.
const RECLAIM_SCAN: usize = 16;

#[derive(Clone)]
pub struct RedisStreamsQueue {
    commands: MultiplexedConnection,
    blocking: MultiplexedConnection,
    stream_key: String,
    dlq_key: String,
    group: String,
    consumer: String,
    max_deliveries: u32,
    visibility_timeout: Duration,
}

impl std::fmt::Debug for RedisStreamsQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsQueue")
            .field("stream_key", &self.stream_key)
            .field("group", &self.group)
            .field("consumer", &self.consumer)
            .field("max_deliveries", &self.max_deliveries)
            .field("visibility_timeout", &self.visibility_timeout)
            .finish()
    }
}

impl RedisStreamsQueue {
    /// Connect and make sure the consumer group exists.
    ///
    /// * `redis_url` - e.g. "redis://localhost:6379"
    /// * `stream_key` - stream holding batch messages (dead letters go to `<key>:dlq`)
    /// * `consumer` - unique name of this process within the group
    /// * `visibility_timeout` - idle time after which another consumer may
    ///   claim an unsettled entry
    pub async fn connect(
        redis_url: &str,
        stream_key: impl Into<String>,
        consumer: impl Into<String>,
        max_deliveries: u32,
        visibility_timeout: Duration,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(classify)?;
        let commands = client
            .get_multiplexed_async_connection()
            .await
            .map_err(classify)?;
        let blocking = client
            .get_multiplexed_async_connection()
            .await
            .map_err(classify)?;

        let stream_key = stream_key.into();
        let queue = Self {
            commands,
            blocking,
            dlq_key: format!("{stream_key}:dlq"),
            stream_key,
            group: DEFAULT_GROUP.to_string(),
            consumer: consumer.into(),
            max_deliveries: max_deliveries.max(1),
            visibility_timeout,
        };
        queue.ensure_consumer_group().await?;
        Ok(queue)
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    pub fn dlq_key(&self) -> &str {
        &self.dlq_key
    }

    /// `XGROUP CREATE … MKSTREAM`; an existing group is fine.
    async fn ensure_consumer_group(&self) -> Result<(), QueueError> {
        let mut conn = self.commands.clone();
        let created: Result<(), RedisError> = conn
            .xgroup_create_mkstream(&self.stream_key, &self.group, "0")
            .await;

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(classify(e)),
        }
    }

    /// Claim the oldest pending entry idle past the visibility timeout.
    async fn reclaim_stale(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.commands.clone();
        let pending: StreamPendingCountReply = conn
            .xpending_count(&self.stream_key, &self.group, "-", "+", RECLAIM_SCAN)
            .await
            .map_err(classify)?;

        let min_idle_ms = self.visibility_timeout.as_millis() as usize;
        for stale in pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms >= min_idle_ms)
        {
            // XCLAIM re-checks idle time, so a racing consumer claims it at most once.
            let claimed: StreamClaimReply = conn
                .xclaim(
                    &self.stream_key,
                    &self.group,
                    &self.consumer,
                    min_idle_ms,
                    &[stale.id.as_str()],
                )
                .await
                .map_err(classify)?;

            let Some(entry) = claimed.ids.into_iter().next() else {
                continue;
            };
            let published: u32 = entry.get("deliveries").unwrap_or(1);
            let attempt = published + stale.times_delivered as u32;

            if attempt > self.max_deliveries {
                self.dead_letter(&entry, attempt - 1).await?;
                continue;
            }

            warn!(
                delivery_id = %entry.id,
                previous_consumer = %stale.consumer,
                attempt,
                "reclaimed unsettled stream entry"
            );
            return Ok(Some(to_delivery(entry, attempt)));
        }

        Ok(None)
    }

    /// Move a claimed entry to the dead-letter stream and settle it.
    async fn dead_letter(&self, entry: &StreamId, attempts: u32) -> Result<(), QueueError> {
        let body: String = entry.get("body").unwrap_or_default();
        let attempts_field = attempts.to_string();
        let failed_at = Utc::now().to_rfc3339();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .xadd(
                &self.dlq_key,
                "*",
                &[
                    ("body", body.as_str()),
                    ("attempts", attempts_field.as_str()),
                    ("original_id", entry.id.as_str()),
                    ("dead_lettered_at", failed_at.as_str()),
                ],
            )
            .ignore()
            .xack(&self.stream_key, &self.group, &[entry.id.as_str()])
            .ignore();

        let mut conn = self.commands.clone();
        let () = pipe.query_async(&mut conn).await.map_err(classify)?;

        warn!(
            delivery_id = %entry.id,
            attempts,
            dlq_key = %self.dlq_key,
            "unsettled message sent to dead-letter stream"
        );
        Ok(())
    }
}

fn to_delivery(entry: StreamId, attempt: u32) -> Delivery {
    let body: String = entry.get("body").unwrap_or_default();
    Delivery {
        id: DeliveryId(entry.id),
        body,
        attempt,
    }
}

#[async_trait]
impl MessageQueue for RedisStreamsQueue {
    #[instrument(skip(self, body), fields(stream_key = %self.stream_key), err)]
    async fn publish_raw(&self, body: String) -> Result<(), QueueError> {
        let mut conn = self.commands.clone();
        let _: String = conn
            .xadd(
                &self.stream_key,
                "*",
                &[("body", body.as_str()), ("deliveries", "1")],
            )
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        if let Some(delivery) = self.reclaim_stale().await? {
            return Ok(Some(delivery));
        }

        let opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1)
            .block(timeout.as_millis().max(1) as usize);

        let mut conn = self.blocking.clone();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream_key], &[">"], &opts)
            .await
            .map_err(classify)?;

        let Some(entry) = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next()
        else {
            return Ok(None);
        };

        let attempt: u32 = entry.get("deliveries").unwrap_or(1);
        debug!(delivery_id = %entry.id, attempt, "received stream entry");

        Ok(Some(to_delivery(entry, attempt)))
    }

    #[instrument(skip(self, delivery), fields(delivery_id = %delivery.id), err)]
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.commands.clone();
        let acked: u64 = conn
            .xack(&self.stream_key, &self.group, &[delivery.id.0.as_str()])
            .await
            .map_err(classify)?;

        if acked == 0 {
            return Err(QueueError::UnknownDelivery(delivery.id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self, delivery), fields(delivery_id = %delivery.id, attempt = delivery.attempt), err)]
    async fn nack(&self, delivery: &Delivery) -> Result<NackOutcome, QueueError> {
        let mut pipe = redis::pipe();
        pipe.atomic();

        let outcome = if delivery.attempt >= self.max_deliveries {
            let attempts = delivery.attempt.to_string();
            let failed_at = Utc::now().to_rfc3339();
            pipe.xadd(
                &self.dlq_key,
                "*",
                &[
                    ("body", delivery.body.as_str()),
                    ("attempts", attempts.as_str()),
                    ("original_id", delivery.id.0.as_str()),
                    ("dead_lettered_at", failed_at.as_str()),
                ],
            )
            .ignore();
            NackOutcome::DeadLettered {
                attempts: delivery.attempt,
            }
        } else {
            let next_attempt = delivery.attempt + 1;
            let deliveries = next_attempt.to_string();
            pipe.xadd(
                &self.stream_key,
                "*",
                &[
                    ("body", delivery.body.as_str()),
                    ("deliveries", deliveries.as_str()),
                ],
            )
            .ignore();
            NackOutcome::Requeued { next_attempt }
        };

        pipe.xack(&self.stream_key, &self.group, &[delivery.id.0.as_str()])
            .ignore();

        let mut conn = self.commands.clone();
        let () = pipe.query_async(&mut conn).await.map_err(classify)?;

        if let NackOutcome::DeadLettered { attempts } = outcome {
            warn!(
                delivery_id = %delivery.id,
                attempts,
                dlq_key = %self.dlq_key,
                "message sent to dead-letter stream"
            );
        }
        Ok(outcome)
    }
}

fn classify(err: RedisError) -> QueueError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        QueueError::Connection(err.to_string())
    } else {
        QueueError::Command(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::ErrorKind;

    #[test]
    fn io_failures_are_connection_errors() {
        let err = RedisError::from((ErrorKind::IoError, "broken pipe"));
        assert!(matches!(classify(err), QueueError::Connection(_)));
    }

    #[test]
    fn server_replies_are_command_errors() {
        let err = RedisError::from((ErrorKind::ResponseError, "WRONGTYPE"));
        assert!(matches!(classify(err), QueueError::Command(_)));
    }
}
