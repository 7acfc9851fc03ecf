//! In-memory live channel for tests/dev.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::channel::ChannelKey;
use crate::live::{LiveChannel, LiveChannelError, LiveSubscription};

const SUBSCRIPTION_BUFFER: usize = 64;

/// In-process pub/sub keyed by `ChannelKey`.
///
/// - Fan-out to every live subscriber of a key
/// - Closed subscribers are pruned while publishing
/// - `set_available(false)` makes every call fail, to exercise fallback paths
#[derive(Debug)]
pub struct InMemoryLiveChannel {
    subscribers: Mutex<HashMap<ChannelKey, Vec<mpsc::Sender<String>>>>,
    published: Mutex<Vec<(ChannelKey, String)>>,
    available: AtomicBool,
}

impl InMemoryLiveChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A channel whose every operation fails.
    pub fn unavailable() -> Self {
        let channel = Self::new();
        channel.set_available(false);
        channel
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of open subscriptions on `key`.
    pub fn subscriber_count(&self, key: &ChannelKey) -> usize {
        let Ok(subs) = self.subscribers.lock() else {
            return 0;
        };
        subs.get(key)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Every payload that reached at least one subscriber, in publish order.
    pub fn published(&self) -> Vec<(ChannelKey, String)> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn ensure_available(&self) -> Result<(), LiveChannelError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            debug!("in-memory live channel is disabled");
            Err(LiveChannelError::Unavailable("in-memory channel disabled".to_string()))
        }
    }
}

impl Default for InMemoryLiveChannel {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl LiveChannel for InMemoryLiveChannel {
    async fn publish(&self, key: &ChannelKey, payload: &str) -> Result<u64, LiveChannelError> {
        self.ensure_available()?;

        let delivered = {
            let mut subs = self
                .subscribers
                .lock()
                .map_err(|_| LiveChannelError::Command("subscriber lock poisoned".to_string()))?;

            let Some(senders) = subs.get_mut(key) else {
                return Ok(0);
            };

            // Drop any dead subscribers while publishing.
            senders.retain(|tx| !tx.is_closed());
            let mut delivered = 0u64;
            for tx in senders.iter() {
                if tx.try_send(payload.to_string()).is_ok() {
                    delivered += 1;
                }
            }
            delivered
        };

        if delivered > 0 {
            if let Ok(mut log) = self.published.lock() {
                log.push((key.clone(), payload.to_string()));
            }
        }

        Ok(delivered)
    }

    async fn subscribe(&self, key: &ChannelKey) -> Result<LiveSubscription, LiveChannelError> {
        self.ensure_available()?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.subscribers
            .lock()
            .map_err(|_| LiveChannelError::Command("subscriber lock poisoned".to_string()))?
            .entry(key.clone())
            .or_default()
            .push(tx);

        Ok(LiveSubscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commandrelay_core::TargetId;

    fn key(raw: &str) -> ChannelKey {
        ChannelKey::for_target("commands", &TargetId::parse(raw).unwrap())
    }

    #[tokio::test]
    async fn publish_without_subscribers_reaches_nobody() {
        let channel = InMemoryLiveChannel::new();
        assert_eq!(channel.publish(&key("a@x.com"), "{}").await.unwrap(), 0);
        assert!(channel.published().is_empty());
    }

    #[tokio::test]
    async fn subscriber_receives_only_its_key() {
        let channel = InMemoryLiveChannel::new();
        let mut sub = channel.subscribe(&key("a@x.com")).await.unwrap();

        assert_eq!(channel.publish(&key("b@x.com"), "other").await.unwrap(), 0);
        assert_eq!(channel.publish(&key("A@x.com"), "mine").await.unwrap(), 1);

        assert_eq!(sub.recv().await.as_deref(), Some("mine"));
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned() {
        let channel = InMemoryLiveChannel::new();
        let sub = channel.subscribe(&key("a@x.com")).await.unwrap();
        assert_eq!(channel.subscriber_count(&key("a@x.com")), 1);
        drop(sub);
        assert_eq!(channel.subscriber_count(&key("a@x.com")), 0);
        assert_eq!(channel.publish(&key("a@x.com"), "{}").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unavailable_channel_fails() {
        let channel = InMemoryLiveChannel::unavailable();
        assert!(channel.publish(&key("a@x.com"), "{}").await.is_err());
        assert!(channel.subscribe(&key("a@x.com")).await.is_err());
    }
}
