//! Queue-triggered batch processing.
//!
//! Each delivery carries `{"id": "<batch id>"}`. The trigger runs the pipeline
//! for that id and settles the delivery according to the outcome:
//!
//! | Outcome | Settlement |
//! |---------|------------|
//! | Batch processed | ack |
//! | `NotFound` | ack (redelivery cannot help) |
//! | `RenderFailure` | ack (batch already marked `failed`) |
//! | `TransientStoreFailure` | nack (redelivered, dead-lettered past the limit) |
//! | Other store error | ack + error log |
//! | Body is not a batch message | ack + error log (poison) |
//!
//! Processing is idempotent, so a delivery processed but not settled
//! (worker crash, failed ack or nack) is safely processed again once the
//! queue reclaims it.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use docgen_core::Batch;
use docgen_messaging::{Delivery, MessageQueue, NackOutcome, QueueError};

use crate::config::QueueTriggerConfig;
use crate::errors::PipelineError;
use crate::pipeline::BatchProcessor;

/// Whether a delivery should be settled or retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nack,
}

/// How a delivery was actually settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Requeued { next_attempt: u32 },
    DeadLettered { attempts: u32 },
}

/// Ack policy for a pipeline result.
pub fn disposition_for(result: &Result<Batch, PipelineError>) -> Disposition {
    match result {
        Err(err) if err.is_transient() => Disposition::Nack,
        _ => Disposition::Ack,
    }
}

/// Trigger runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct TriggerStats {
    pub received: u64,
    pub processed: u64,
    pub failed: u64,
    pub acked: u64,
    pub nacked: u64,
    pub dead_lettered: u64,
    pub poison: u64,
}

/// Handle to control a running trigger.
#[derive(Debug)]
pub struct QueueTriggerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<TriggerStats>>,
}

impl QueueTriggerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// A delivery already being processed is finished and settled first.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "queue trigger task ended abnormally");
            }
        }
    }

    /// Get current trigger statistics.
    pub fn stats(&self) -> TriggerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Consumes batch messages and drives the pipeline.
pub struct QueueTrigger<Q, P> {
    queue: Q,
    processor: P,
    stats: Arc<Mutex<TriggerStats>>,
}

impl<Q, P> QueueTrigger<Q, P>
where
    Q: MessageQueue + 'static,
    P: BatchProcessor + 'static,
{
    pub fn new(queue: Q, processor: P) -> Self {
        Self {
            queue,
            processor,
            stats: Arc::new(Mutex::new(TriggerStats::default())),
        }
    }

    pub fn stats(&self) -> TriggerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Handle one delivery end to end: decode, process, settle.
    ///
    /// Errors are only returned when settling the delivery itself fails; the
    /// delivery then stays in flight until the queue's visibility timeout
    /// hands it out again.
    #[instrument(skip(self, delivery), fields(delivery_id = %delivery.id, attempt = delivery.attempt))]
    pub async fn process_async(&self, delivery: &Delivery) -> Result<Settlement, QueueError> {
        self.record(|s| s.received += 1);

        let message = match delivery.decode() {
            Ok(message) => message,
            Err(err) => {
                error!(error = %err, body = %delivery.body, "poison message; dropping");
                self.record(|s| s.poison += 1);
                return self.settle(delivery, Disposition::Ack).await;
            }
        };

        let started = Instant::now();
        let result = self.processor.process(&message.id).await;
        let disposition = disposition_for(&result);

        match &result {
            Ok(batch) => {
                debug!(
                    batch_id = %message.id,
                    status = %batch.status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "batch message handled"
                );
                self.record(|s| s.processed += 1);
            }
            Err(PipelineError::NotFound(id)) => {
                warn!(batch_id = %id, "batch message for unknown batch");
                self.record(|s| s.failed += 1);
            }
            Err(err @ PipelineError::RenderFailure { .. }) => {
                warn!(batch_id = %message.id, error = %err, "batch render failed");
                self.record(|s| s.failed += 1);
            }
            Err(err) if err.is_transient() => {
                warn!(batch_id = %message.id, error = %err, "transient failure; requesting redelivery");
                self.record(|s| s.failed += 1);
            }
            Err(err) => {
                error!(batch_id = %message.id, error = %err, "batch processing failed permanently");
                self.record(|s| s.failed += 1);
            }
        }

        self.settle(delivery, disposition).await
    }

    async fn settle(
        &self,
        delivery: &Delivery,
        disposition: Disposition,
    ) -> Result<Settlement, QueueError> {
        match disposition {
            Disposition::Ack => {
                self.queue.ack(delivery).await?;
                self.record(|s| s.acked += 1);
                Ok(Settlement::Acked)
            }
            Disposition::Nack => match self.queue.nack(delivery).await? {
                NackOutcome::Requeued { next_attempt } => {
                    self.record(|s| s.nacked += 1);
                    Ok(Settlement::Requeued { next_attempt })
                }
                NackOutcome::DeadLettered { attempts } => {
                    error!(delivery_id = %delivery.id, attempts, "delivery dead-lettered");
                    self.record(|s| {
                        s.nacked += 1;
                        s.dead_lettered += 1;
                    });
                    Ok(Settlement::DeadLettered { attempts })
                }
            },
        }
    }

    fn record(&self, f: impl FnOnce(&mut TriggerStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    /// Spawn the receive loop on the current tokio runtime.
    pub fn spawn(self, config: QueueTriggerConfig) -> QueueTriggerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let join = tokio::spawn(trigger_loop(self, config, shutdown_rx));

        QueueTriggerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }
}

async fn trigger_loop<Q, P>(
    trigger: QueueTrigger<Q, P>,
    config: QueueTriggerConfig,
    shutdown_rx: watch::Receiver<bool>,
) where
    Q: MessageQueue + 'static,
    P: BatchProcessor + 'static,
{
    info!(trigger = %config.name, "queue trigger started");

    loop {
        // Shutdown check (non-blocking); a dropped handle also stops the loop.
        let stop = *shutdown_rx.borrow();
        if stop || shutdown_rx.has_changed().is_err() {
            break;
        }

        match trigger.queue.receive(config.poll_interval).await {
            Ok(Some(delivery)) => {
                if let Err(e) = trigger.process_async(&delivery).await {
                    error!(
                        trigger = %config.name,
                        delivery_id = %delivery.id,
                        error = %e,
                        "failed to settle delivery"
                    );
                }
            }
            Ok(None) => continue,
            Err(e) => {
                error!(trigger = %config.name, error = %e, "failed to receive from queue");
                tokio::time::sleep(config.poll_interval).await;
            }
        }
    }

    info!(trigger = %config.name, "queue trigger stopped");
}
