//! In-memory work queue for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

use crate::message::{DeadLetter, Delivery, DeliveryId};
use crate::queue::{MessageQueue, NackOutcome, QueueError};

/// Default number of deliveries before a message is dead-lettered.
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

/// Default time a delivery may stay unsettled before it is redelivered.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct Entry {
    body: String,
    attempt: u32,
}

#[derive(Debug)]
struct InFlight {
    entry: Entry,
    received_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Entry>,
    in_flight: HashMap<DeliveryId, InFlight>,
    dead: Vec<DeadLetter>,
}

impl State {
    fn dead_letter(&mut self, delivery_id: &DeliveryId, entry: Entry) {
        warn!(
            delivery_id = %delivery_id,
            attempts = entry.attempt,
            "message dead-lettered"
        );
        self.dead.push(DeadLetter {
            body: entry.body,
            attempts: entry.attempt,
            dead_lettered_at: Utc::now(),
        });
    }
}

/// In-memory FIFO queue with ack/nack, redelivery and a dead-letter list.
///
/// - No IO
/// - Competing consumers: each message goes to exactly one receiver at a time
/// - A delivery left unsettled past the visibility timeout (crashed consumer,
///   failed ack/nack) is redelivered with `attempt + 1`
#[derive(Debug)]
pub struct InMemoryQueue {
    state: Mutex<State>,
    notify: Notify,
    max_deliveries: u32,
    visibility_timeout: Duration,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::with_max_deliveries(DEFAULT_MAX_DELIVERIES)
    }

    pub fn with_max_deliveries(max_deliveries: u32) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            max_deliveries: max_deliveries.max(1),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    /// Messages waiting to be received.
    pub fn ready_len(&self) -> usize {
        self.state.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    /// Messages received but not yet settled.
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().map(|s| s.dead.clone()).unwrap_or_default()
    }

    /// Move deliveries unsettled past the visibility timeout back to `ready`
    /// (or to the dead-letter list once they have used up their deliveries).
    fn reclaim_expired(&self, state: &mut State) {
        let now = Instant::now();
        let expired: Vec<DeliveryId> = state
            .in_flight
            .iter()
            .filter(|(_, f)| now.duration_since(f.received_at) >= self.visibility_timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            let Some(InFlight { entry, .. }) = state.in_flight.remove(&id) else {
                continue;
            };
            if entry.attempt >= self.max_deliveries {
                state.dead_letter(&id, entry);
            } else {
                warn!(delivery_id = %id, attempt = entry.attempt, "visibility timeout elapsed; redelivering");
                state.ready.push_back(Entry {
                    body: entry.body,
                    attempt: entry.attempt + 1,
                });
            }
        }
    }

    fn try_take(&self) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
        self.reclaim_expired(&mut state);
        let Some(entry) = state.ready.pop_front() else {
            return Ok(None);
        };

        let id = DeliveryId(Uuid::now_v7().to_string());
        let delivery = Delivery {
            id: id.clone(),
            body: entry.body.clone(),
            attempt: entry.attempt,
        };
        state.in_flight.insert(
            id,
            InFlight {
                entry,
                received_at: Instant::now(),
            },
        );
        Ok(Some(delivery))
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn publish_raw(&self, body: String) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
            state.ready.push_back(Entry { body, attempt: 1 });
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so a concurrent publish is not missed.
            let notified = self.notify.notified();

            if let Some(delivery) = self.try_take()? {
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return self.try_take();
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
        state
            .in_flight
            .remove(&delivery.id)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.id.to_string()))
    }

    async fn nack(&self, delivery: &Delivery) -> Result<NackOutcome, QueueError> {
        let outcome = {
            let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
            let InFlight { entry, .. } = state
                .in_flight
                .remove(&delivery.id)
                .ok_or_else(|| QueueError::UnknownDelivery(delivery.id.to_string()))?;

            if entry.attempt >= self.max_deliveries {
                let attempts = entry.attempt;
                state.dead_letter(&delivery.id, entry);
                NackOutcome::DeadLettered { attempts }
            } else {
                let next_attempt = entry.attempt + 1;
                state.ready.push_back(Entry {
                    body: entry.body,
                    attempt: next_attempt,
                });
                NackOutcome::Requeued { next_attempt }
            }
        };

        if matches!(outcome, NackOutcome::Requeued { .. }) {
            self.notify.notify_one();
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::BatchMessage;

    const TICK: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn publish_receive_ack() {
        let queue = InMemoryQueue::new();
        queue.publish(&BatchMessage::new("b-1")).await.unwrap();

        let delivery = queue.receive(TICK).await.unwrap().unwrap();
        assert_eq!(delivery.attempt, 1);
        assert_eq!(delivery.decode().unwrap().id.as_str(), "b-1");
        assert_eq!(queue.in_flight_len(), 1);

        queue.ack(&delivery).await.unwrap();
        assert_eq!(queue.in_flight_len(), 0);
        assert!(queue.receive(TICK).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nack_redelivers_with_incremented_attempt() {
        let queue = InMemoryQueue::new();
        queue.publish(&BatchMessage::new("b-1")).await.unwrap();

        let first = queue.receive(TICK).await.unwrap().unwrap();
        let outcome = queue.nack(&first).await.unwrap();
        assert_eq!(outcome, NackOutcome::Requeued { next_attempt: 2 });

        let second = queue.receive(TICK).await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);
        assert_eq!(second.body, first.body);
        assert_ne!(second.id, first.id);
    }

    #[tokio::test]
    async fn nack_past_limit_dead_letters() {
        let queue = InMemoryQueue::with_max_deliveries(2);
        queue.publish(&BatchMessage::new("b-1")).await.unwrap();

        let d1 = queue.receive(TICK).await.unwrap().unwrap();
        queue.nack(&d1).await.unwrap();
        let d2 = queue.receive(TICK).await.unwrap().unwrap();
        let outcome = queue.nack(&d2).await.unwrap();

        assert_eq!(outcome, NackOutcome::DeadLettered { attempts: 2 });
        assert!(queue.receive(TICK).await.unwrap().is_none());
        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 2);
    }

    #[tokio::test]
    async fn double_ack_is_rejected() {
        let queue = InMemoryQueue::new();
        queue.publish(&BatchMessage::new("b-1")).await.unwrap();
        let delivery = queue.receive(TICK).await.unwrap().unwrap();

        queue.ack(&delivery).await.unwrap();
        assert!(matches!(
            queue.ack(&delivery).await,
            Err(QueueError::UnknownDelivery(_))
        ));
    }

    #[tokio::test]
    async fn unsettled_delivery_is_redelivered_after_visibility_timeout() {
        let queue = InMemoryQueue::new().with_visibility_timeout(Duration::from_millis(50));
        queue.publish(&BatchMessage::new("b-1")).await.unwrap();

        let first = queue.receive(TICK).await.unwrap().unwrap();
        assert!(queue.receive(TICK).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(60)).await;
        let second = queue.receive(TICK).await.unwrap().unwrap();
        assert_eq!(second.body, first.body);
        assert_eq!(second.attempt, 2);
        assert_eq!(queue.in_flight_len(), 1);

        // The abandoned delivery can no longer be settled.
        assert!(matches!(
            queue.ack(&first).await,
            Err(QueueError::UnknownDelivery(_))
        ));
        queue.ack(&second).await.unwrap();
        assert_eq!(queue.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn expired_delivery_past_limit_is_dead_lettered() {
        let queue = InMemoryQueue::with_max_deliveries(1)
            .with_visibility_timeout(Duration::from_millis(10));
        queue.publish(&BatchMessage::new("b-1")).await.unwrap();

        let _abandoned = queue.receive(TICK).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(queue.receive(TICK).await.unwrap().is_none());
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.dead_letters().len(), 1);
        assert_eq!(queue.dead_letters()[0].attempts, 1);
    }

    #[tokio::test]
    async fn receive_wakes_on_publish() {
        let queue = std::sync::Arc::new(InMemoryQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive(Duration::from_secs(2)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.publish(&BatchMessage::new("late")).await.unwrap();

        let delivery = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.decode().unwrap().id.as_str(), "late");
    }
}
