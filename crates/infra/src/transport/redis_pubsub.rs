//! Redis pub/sub live channel.
//!
//! Redis pub/sub is not durable: a message published while the target has no
//! subscription is dropped. `PUBLISH` reports how many subscribers received
//! it, which is what the dispatcher uses to decide on the durable fallback.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, instrument, warn};

use commandrelay_events::{ChannelKey, LiveChannel, LiveChannelError, LiveSubscription};

const SUBSCRIPTION_BUFFER: usize = 64;

/// Live channel over Redis pub/sub.
///
/// Publishing shares one multiplexed connection; each subscription opens its
/// own pub/sub connection, closed when the subscription is dropped.
#[derive(Clone)]
pub struct RedisLiveChannel {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl core::fmt::Debug for RedisLiveChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisLiveChannel").finish_non_exhaustive()
    }
}

impl RedisLiveChannel {
    pub async fn connect(redis_url: impl AsRef<str>) -> Result<Self, LiveChannelError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| LiveChannelError::Unavailable(e.to_string()))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| LiveChannelError::Unavailable(e.to_string()))?;
        Ok(Self { client, conn })
    }

    /// Shared connection, reused by `RedisPresence`.
    pub fn connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

#[async_trait]
impl LiveChannel for RedisLiveChannel {
    #[instrument(skip(self, payload), fields(channel = %key), err)]
    async fn publish(&self, key: &ChannelKey, payload: &str) -> Result<u64, LiveChannelError> {
        let mut conn = self.conn.clone();
        let receivers: u64 = conn
            .publish(key.as_str(), payload)
            .await
            .map_err(|e| LiveChannelError::Command(format!("PUBLISH failed: {}", e)))?;
        Ok(receivers)
    }

    async fn subscribe(&self, key: &ChannelKey) -> Result<LiveSubscription, LiveChannelError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| LiveChannelError::Unavailable(e.to_string()))?;
        pubsub
            .subscribe(key.as_str())
            .await
            .map_err(|e| LiveChannelError::Command(format!("SUBSCRIBE failed: {}", e)))?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let channel = key.to_string();

        // Forward messages until the subscriber goes away or Redis disconnects.
        tokio::spawn(async move {
            let mut messages = Box::pin(pubsub.on_message());
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "dropping non-text pub/sub payload");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
            debug!(channel = %channel, "live subscription closed");
        });

        Ok(LiveSubscription::new(rx))
    }
}
