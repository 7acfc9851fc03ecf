//! Redis Streams durable command queue.
//!
//! - **Durable delivery**: entries persist until acknowledged
//! - **At-least-once**: unacked entries idle longer than `claim_idle` are
//!   reclaimed (XPENDING + XCLAIM) and delivered again
//! - **Consumer group**: every intake process joins the same group, so each
//!   entry is handled by one consumer at a time
//! - **Dead-letter stream**: poison messages are copied to `dlq_key`
//!
//! ## Keys
//!
//! - Stream: `commandrelay:commands`, fields `target`, `payload`, `enqueued_at`
//! - Dead-letter stream: `commandrelay:commands:dlq`

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use tracing::{debug, instrument, warn};

use commandrelay_core::TargetId;
use commandrelay_events::{Delivery, DurableQueue, DurableQueueConsumer, DurableQueueError};

#[derive(Debug, Clone)]
pub struct RedisStreamsConfig {
    pub stream_key: String,
    pub dlq_key: String,
    pub group: String,
    /// Unique within the group.
    pub consumer: String,
    /// Idle time after which another consumer may reclaim a delivery.
    pub claim_idle: Duration,
}

impl Default for RedisStreamsConfig {
    fn default() -> Self {
        Self {
            stream_key: "commandrelay:commands".to_string(),
            dlq_key: "commandrelay:commands:dlq".to_string(),
            group: "commandrelay.intake".to_string(),
            consumer: format!("intake-{}", uuid::Uuid::now_v7()),
            claim_idle: Duration::from_secs(30),
        }
    }
}

/// Producer and consumer-group client.
///
/// `XREADGROUP ... BLOCK` holds its connection for up to `block`, so it gets a
/// dedicated `reader`. Every other command goes through `writer`, which must
/// never be shared with the blocking read.
#[derive(Clone)]
pub struct RedisStreamsQueue {
    writer: MultiplexedConnection,
    reader: MultiplexedConnection,
    config: RedisStreamsConfig,
}

impl core::fmt::Debug for RedisStreamsQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisStreamsQueue")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStreamsQueue {
    pub async fn connect(redis_url: impl AsRef<str>, config: RedisStreamsConfig) -> Result<Self, DurableQueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| DurableQueueError::Unavailable(e.to_string()))?;
        let writer = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| DurableQueueError::Unavailable(e.to_string()))?;
        let reader = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| DurableQueueError::Unavailable(e.to_string()))?;
        Ok(Self::from_connections(writer, reader, config))
    }

    /// `reader` must be a connection nothing else issues commands on.
    pub fn from_connections(
        writer: MultiplexedConnection,
        reader: MultiplexedConnection,
        config: RedisStreamsConfig,
    ) -> Self {
        Self { writer, reader, config }
    }

    pub fn config(&self) -> &RedisStreamsConfig {
        &self.config
    }

    /// Create the consumer group (and stream) if missing.
    pub async fn ensure_consumer_group(&self) -> Result<(), DurableQueueError> {
        let mut conn = self.writer.clone();
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.config.stream_key, &self.config.group, "0")
            .await;

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(DurableQueueError::Command(format!("XGROUP CREATE failed: {}", e))),
        }
    }

    /// Reclaim deliveries other consumers left idle for too long.
    async fn claim_stale(&self, conn: &mut MultiplexedConnection, max: usize) -> Result<Vec<Delivery>, DurableQueueError> {
        let pending: StreamPendingCountReply = conn
            .xpending_count(&self.config.stream_key, &self.config.group, "-", "+", max)
            .await
            .map_err(|e| DurableQueueError::Command(format!("XPENDING failed: {}", e)))?;

        let idle_ms = self.config.claim_idle.as_millis() as usize;
        let stale: HashMap<String, u64> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms >= idle_ms)
            .map(|p| (p.id, p.times_delivered as u64))
            .collect();

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&String> = stale.keys().collect();
        let claimed: StreamClaimReply = conn
            .xclaim(
                &self.config.stream_key,
                &self.config.group,
                &self.config.consumer,
                idle_ms,
                &ids[..],
            )
            .await
            .map_err(|e| DurableQueueError::Command(format!("XCLAIM failed: {}", e)))?;

        Ok(claimed
            .ids
            .iter()
            .map(|entry| {
                let previous = stale.get(&entry.id).copied().unwrap_or(0);
                to_delivery(entry, previous + 1)
            })
            .collect())
    }

    async fn read_new(
        &self,
        max: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>, DurableQueueError> {
        let mut options = StreamReadOptions::default()
            .group(&self.config.group, &self.config.consumer)
            .count(max);
        // BLOCK 0 would wait forever.
        if !block.is_zero() {
            options = options.block(block.as_millis() as usize);
        }

        let mut conn = self.reader.clone();
        // Nil when the block timeout elapses with nothing new.
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.config.stream_key], &[">"], &options)
            .await
            .map_err(|e| DurableQueueError::Command(format!("XREADGROUP failed: {}", e)))?;

        Ok(reply
            .map(|r| r.keys)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|key| key.ids)
            .map(|entry| to_delivery(&entry, 1))
            .collect())
    }
}

fn to_delivery(entry: &StreamId, delivery_count: u64) -> Delivery {
    Delivery {
        message_id: entry.id.clone(),
        target: entry
            .get::<String>("target")
            .and_then(|t| TargetId::parse(&t).ok()),
        // A missing payload decodes as malformed and gets dead-lettered.
        payload: entry.get::<String>("payload").unwrap_or_default(),
        delivery_count,
    }
}

#[async_trait]
impl DurableQueue for RedisStreamsQueue {
    #[instrument(skip(self, payload), fields(stream_key = %self.config.stream_key, target = %target), err)]
    async fn enqueue(&self, target: &TargetId, payload: &str) -> Result<String, DurableQueueError> {
        let mut conn = self.writer.clone();
        let enqueued_at = Utc::now().to_rfc3339();

        let id: String = conn
            .xadd(
                &self.config.stream_key,
                "*",
                &[
                    ("target", target.as_str()),
                    ("payload", payload),
                    ("enqueued_at", enqueued_at.as_str()),
                ],
            )
            .await
            .map_err(|e| DurableQueueError::Command(format!("XADD failed: {}", e)))?;

        Ok(id)
    }
}

#[async_trait]
impl DurableQueueConsumer for RedisStreamsQueue {
    async fn receive(&self, max: usize, block: Duration) -> Result<Vec<Delivery>, DurableQueueError> {
        let mut conn = self.writer.clone();
        let max = max.max(1);

        let reclaimed = self.claim_stale(&mut conn, max).await?;
        if !reclaimed.is_empty() {
            debug!(count = reclaimed.len(), "reclaimed idle deliveries");
            return Ok(reclaimed);
        }

        self.read_new(max, block).await
    }

    async fn ack(&self, message_ids: &[String]) -> Result<u64, DurableQueueError> {
        if message_ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.writer.clone();
        conn.xack(&self.config.stream_key, &self.config.group, message_ids)
            .await
            .map_err(|e| DurableQueueError::Command(format!("XACK failed: {}", e)))
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), DurableQueueError> {
        let mut conn = self.writer.clone();
        let delivery_count = delivery.delivery_count.to_string();
        let failed_at = Utc::now().to_rfc3339();

        let _: String = conn
            .xadd(
                &self.config.dlq_key,
                "*",
                &[
                    ("original_message_id", delivery.message_id.as_str()),
                    ("delivery_count", delivery_count.as_str()),
                    ("reason", reason),
                    ("failed_at", failed_at.as_str()),
                    ("payload", delivery.payload.as_str()),
                ],
            )
            .await
            .map_err(|e| DurableQueueError::Command(format!("DLQ XADD failed: {}", e)))?;

        warn!(
            message_id = %delivery.message_id,
            delivery_count = delivery.delivery_count,
            "message sent to dead-letter stream"
        );
        Ok(())
    }
}
