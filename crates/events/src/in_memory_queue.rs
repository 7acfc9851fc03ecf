//! In-memory durable queue for tests/dev.
//!
//! Mirrors consumer-group semantics closely enough for the intake worker:
//! deliveries stay outstanding until acked and reappear after the visibility
//! timeout with an incremented delivery count.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use commandrelay_core::TargetId;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::durable::{DeadLetter, Delivery, DurableQueue, DurableQueueConsumer, DurableQueueError};

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug)]
struct Entry {
    target: TargetId,
    payload: String,
    delivery_count: u64,
    invisible_until: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    next_seq: u64,
    outstanding: BTreeMap<u64, Entry>,
    enqueued: Vec<(TargetId, String)>,
    dead_letters: Vec<DeadLetter>,
}

#[derive(Debug)]
pub struct InMemoryDurableQueue {
    state: Mutex<State>,
    notify: Notify,
    visibility_timeout: Duration,
    failing: AtomicBool,
}

impl InMemoryDurableQueue {
    pub fn new() -> Self {
        Self::with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }

    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            visibility_timeout,
            failing: AtomicBool::new(false),
        }
    }

    /// When set, `enqueue` fails as if the broker were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every accepted message in enqueue order, including acked ones.
    pub fn enqueued(&self) -> Vec<(TargetId, String)> {
        self.state.lock().map(|s| s.enqueued.clone()).unwrap_or_default()
    }

    /// Messages not yet acked.
    pub fn outstanding(&self) -> usize {
        self.state.lock().map(|s| s.outstanding.len()).unwrap_or(0)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().map(|s| s.dead_letters.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, DurableQueueError> {
        self.state
            .lock()
            .map_err(|_| DurableQueueError::Command("queue lock poisoned".to_string()))
    }

    fn take_visible(&self, max: usize) -> Result<Vec<Delivery>, DurableQueueError> {
        let now = Instant::now();
        let visibility_timeout = self.visibility_timeout;
        let mut state = self.lock()?;

        let deliveries = state
            .outstanding
            .iter_mut()
            .filter(|(_, entry)| entry.invisible_until.is_none_or(|until| until <= now))
            .take(max)
            .map(|(seq, entry)| {
                entry.delivery_count += 1;
                entry.invisible_until = Some(now + visibility_timeout);
                Delivery {
                    message_id: message_id(*seq),
                    target: Some(entry.target.clone()),
                    payload: entry.payload.clone(),
                    delivery_count: entry.delivery_count,
                }
            })
            .collect();

        Ok(deliveries)
    }
}

impl Default for InMemoryDurableQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn message_id(seq: u64) -> String {
    format!("{seq}-0")
}

fn parse_message_id(id: &str) -> Option<u64> {
    id.split('-').next()?.parse().ok()
}

#[async_trait]
impl DurableQueue for InMemoryDurableQueue {
    async fn enqueue(&self, target: &TargetId, payload: &str) -> Result<String, DurableQueueError> {
        if self.failing.load(Ordering::SeqCst) {
            debug!(recipient = %target, "in-memory queue is failing, enqueue refused");
            return Err(DurableQueueError::Unavailable("in-memory queue disabled".to_string()));
        }

        let id = {
            let mut state = self.lock()?;
            state.next_seq += 1;
            let seq = state.next_seq;
            state.outstanding.insert(
                seq,
                Entry {
                    target: target.clone(),
                    payload: payload.to_string(),
                    delivery_count: 0,
                    invisible_until: None,
                },
            );
            state.enqueued.push((target.clone(), payload.to_string()));
            message_id(seq)
        };

        self.notify.notify_waiters();
        Ok(id)
    }
}

#[async_trait]
impl DurableQueueConsumer for InMemoryDurableQueue {
    async fn receive(&self, max: usize, block: Duration) -> Result<Vec<Delivery>, DurableQueueError> {
        let deadline = Instant::now() + block;
        loop {
            // Register before checking so an enqueue in between is not missed.
            let notified = self.notify.notified();

            let deliveries = self.take_visible(max.max(1))?;
            if !deliveries.is_empty() {
                return Ok(deliveries);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let wait = (deadline - now).min(POLL_INTERVAL);
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    async fn ack(&self, message_ids: &[String]) -> Result<u64, DurableQueueError> {
        let mut state = self.lock()?;
        let removed = message_ids
            .iter()
            .filter_map(|id| parse_message_id(id))
            .filter(|seq| state.outstanding.remove(seq).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), DurableQueueError> {
        self.lock()?
            .dead_letters
            .push(DeadLetter::from_delivery(delivery, reason));
        warn!(
            message_id = %delivery.message_id,
            delivery_count = delivery.delivery_count,
            reason,
            "message dead-lettered"
        );
        Ok(())
    }
}
