//! Durable, at-least-once command queue.
//!
//! Producers `enqueue` a serialized command addressed to a target. A consumer
//! group reads deliveries, acks them once handled, and dead-letters messages
//! that can never succeed. Unacked deliveries become visible again, so every
//! consumer must tolerate duplicates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use commandrelay_core::TargetId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DurableQueueError {
    #[error("durable queue unavailable: {0}")]
    Unavailable(String),

    #[error("durable queue command failed: {0}")]
    Command(String),
}

/// One delivery of a queued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
    pub target: Option<TargetId>,
    pub payload: String,
    /// 1 on first delivery, incremented on each redelivery.
    pub delivery_count: u64,
}

/// A message moved aside after it could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub message_id: String,
    pub payload: String,
    pub reason: String,
    pub delivery_count: u64,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn from_delivery(delivery: &Delivery, reason: &str) -> Self {
        Self {
            message_id: delivery.message_id.clone(),
            payload: delivery.payload.clone(),
            reason: reason.to_string(),
            delivery_count: delivery.delivery_count,
            dead_lettered_at: Utc::now(),
        }
    }
}

/// Producer side: returns the broker-assigned message id.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    async fn enqueue(&self, target: &TargetId, payload: &str) -> Result<String, DurableQueueError>;
}

/// Consumer-group side.
#[async_trait]
pub trait DurableQueueConsumer: Send + Sync {
    /// Up to `max` deliveries, waiting at most `block` when none are ready.
    async fn receive(&self, max: usize, block: Duration) -> Result<Vec<Delivery>, DurableQueueError>;

    /// Remove handled messages; returns how many were still outstanding.
    async fn ack(&self, message_ids: &[String]) -> Result<u64, DurableQueueError>;

    /// Record the delivery in the dead-letter sink. Does not ack.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), DurableQueueError>;
}

#[async_trait]
impl<T> DurableQueue for Arc<T>
where
    T: DurableQueue + ?Sized,
{
    async fn enqueue(&self, target: &TargetId, payload: &str) -> Result<String, DurableQueueError> {
        (**self).enqueue(target, payload).await
    }
}

#[async_trait]
impl<T> DurableQueueConsumer for Arc<T>
where
    T: DurableQueueConsumer + ?Sized,
{
    async fn receive(&self, max: usize, block: Duration) -> Result<Vec<Delivery>, DurableQueueError> {
        (**self).receive(max, block).await
    }

    async fn ack(&self, message_ids: &[String]) -> Result<u64, DurableQueueError> {
        (**self).ack(message_ids).await
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), DurableQueueError> {
        (**self).dead_letter(delivery, reason).await
    }
}
