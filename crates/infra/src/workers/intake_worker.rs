//! Durable-queue consumer driving `IntakeService`.
//!
//! - Pulls batches from a `DurableQueueConsumer`
//! - Runs up to `max_concurrent` intake invocations at once, each independent
//! - Success → ack
//! - Permanent failure → dead-letter, then ack
//! - Transient failure → leave unacked so the queue redelivers; once the
//!   delivery count reaches `max_deliveries`, dead-letter instead
//!
//! The worker never retries in-process; redelivery is the queue's job.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use commandrelay_events::{Delivery, DurableQueueConsumer};

use crate::intake::{IntakeError, IntakeReceipt, IntakeService};

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct IntakeWorkerConfig {
    /// Name for logging
    pub name: String,
    /// Maximum concurrent intake invocations
    pub max_concurrent: usize,
    /// How long one receive call may block waiting for messages
    pub block: Duration,
    /// Deliveries allowed before a transient failure is dead-lettered
    pub max_deliveries: u64,
}

impl Default for IntakeWorkerConfig {
    fn default() -> Self {
        Self {
            name: "intake-worker".to_string(),
            max_concurrent: 4,
            block: Duration::from_millis(250),
            max_deliveries: 5,
        }
    }
}

impl IntakeWorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn with_max_deliveries(mut self, max: u64) -> Self {
        self.max_deliveries = max.max(1);
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntakeWorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// What to do with a delivery after intake ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Leave unacked for redelivery.
    Retry,
    DeadLetter(String),
}

impl Disposition {
    pub fn decide(outcome: &Result<IntakeReceipt, IntakeError>, delivery_count: u64, max_deliveries: u64) -> Self {
        match outcome {
            Ok(_) => Disposition::Ack,
            Err(e) if e.is_permanent() => Disposition::DeadLetter(e.to_string()),
            Err(e) if delivery_count >= max_deliveries => {
                Disposition::DeadLetter(format!("gave up after {delivery_count} deliveries: {e}"))
            }
            Err(_) => Disposition::Retry,
        }
    }
}

/// Handle to control a running intake worker.
#[derive(Debug)]
pub struct IntakeWorkerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<IntakeWorkerStats>>,
    started: Instant,
}

impl IntakeWorkerHandle {
    /// Request graceful shutdown; in-flight invocations are allowed to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(j) = self.join.take() {
            if let Err(e) = j.await {
                error!(error = %e, "intake worker task failed");
            }
        }
    }

    pub fn stats(&self) -> IntakeWorkerStats {
        let mut stats = self.stats.lock().map(|s| s.clone()).unwrap_or_default();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

#[derive(Debug)]
pub struct IntakeWorker;

impl IntakeWorker {
    pub fn spawn(
        consumer: Arc<dyn DurableQueueConsumer>,
        service: IntakeService,
        config: IntakeWorkerConfig,
    ) -> IntakeWorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(IntakeWorkerStats::default()));

        let join = tokio::spawn(worker_loop(consumer, service, config, shutdown_rx, stats.clone()));

        IntakeWorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
            started: Instant::now(),
        }
    }
}

async fn worker_loop(
    consumer: Arc<dyn DurableQueueConsumer>,
    service: IntakeService,
    config: IntakeWorkerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    stats: Arc<Mutex<IntakeWorkerStats>>,
) {
    info!(worker = %config.name, max_concurrent = config.max_concurrent, "intake worker started");
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        while in_flight.try_join_next().is_some() {}

        let capacity = config.max_concurrent.saturating_sub(in_flight.len());
        if capacity == 0 {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = in_flight.join_next() => continue,
            }
        }

        let batch = tokio::select! {
            _ = shutdown_rx.changed() => break,
            batch = consumer.receive(capacity, config.block) => batch,
        };

        match batch {
            Ok(deliveries) => {
                for delivery in deliveries {
                    in_flight.spawn(handle_delivery(
                        consumer.clone(),
                        service.clone(),
                        delivery,
                        config.max_deliveries,
                        stats.clone(),
                    ));
                }
            }
            Err(e) => {
                warn!(worker = %config.name, error = %e, "failed to receive from durable queue");
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                }
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
    info!(worker = %config.name, "intake worker stopped");
}

async fn handle_delivery(
    consumer: Arc<dyn DurableQueueConsumer>,
    service: IntakeService,
    delivery: Delivery,
    max_deliveries: u64,
    stats: Arc<Mutex<IntakeWorkerStats>>,
) {
    update(&stats, |s| s.current_running += 1);

    let outcome = service.on_message(&delivery.payload).await;
    let disposition = Disposition::decide(&outcome, delivery.delivery_count, max_deliveries);

    match &disposition {
        Disposition::Ack => {
            ack(&*consumer, &delivery).await;
            update(&stats, |s| s.succeeded += 1);
        }
        Disposition::Retry => {
            debug!(
                message_id = %delivery.message_id,
                delivery_count = delivery.delivery_count,
                "intake failed transiently; leaving message for redelivery"
            );
            update(&stats, |s| s.retried += 1);
        }
        Disposition::DeadLetter(reason) => {
            match consumer.dead_letter(&delivery, reason).await {
                Ok(()) => {
                    warn!(
                        message_id = %delivery.message_id,
                        delivery_count = delivery.delivery_count,
                        reason = %reason,
                        "message dead-lettered"
                    );
                    ack(&*consumer, &delivery).await;
                    update(&stats, |s| s.dead_lettered += 1);
                }
                Err(e) => {
                    error!(message_id = %delivery.message_id, error = %e, "failed to dead-letter message");
                    update(&stats, |s| s.retried += 1);
                }
            }
        }
    }

    update(&stats, |s| {
        s.processed += 1;
        s.current_running = s.current_running.saturating_sub(1);
    });
}

async fn ack(consumer: &dyn DurableQueueConsumer, delivery: &Delivery) {
    if let Err(e) = consumer.ack(std::slice::from_ref(&delivery.message_id)).await {
        // The message will be redelivered and produce a duplicate row, which
        // acknowledgment tolerates.
        error!(message_id = %delivery.message_id, error = %e, "failed to ack message");
    }
}

fn update(stats: &Mutex<IntakeWorkerStats>, f: impl FnOnce(&mut IntakeWorkerStats)) {
    if let Ok(mut s) = stats.lock() {
        f(&mut s);
    }
}
