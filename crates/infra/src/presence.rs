//! Presence: best-effort knowledge of whether a target holds a live connection.
//!
//! Intake only uses this to decide whether an immediate live resend is worth
//! attempting. A stale answer costs at most one wasted publish or one delayed
//! delivery; the pending row is what guarantees the command is not lost.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use commandrelay_core::TargetId;
use commandrelay_events::{ChannelKey, InMemoryLiveChannel};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PresenceError {
    #[error("presence lookup failed: {0}")]
    Lookup(String),
}

#[async_trait]
pub trait Presence: Send + Sync {
    async fn is_online(&self, target: &TargetId) -> Result<bool, PresenceError>;
}

#[async_trait]
impl<T> Presence for Arc<T>
where
    T: Presence + ?Sized,
{
    async fn is_online(&self, target: &TargetId) -> Result<bool, PresenceError> {
        (**self).is_online(target).await
    }
}

/// Explicitly maintained online set (tests/dev).
#[derive(Debug, Default)]
pub struct StaticPresence {
    online: RwLock<HashSet<TargetId>>,
}

impl StaticPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_online(targets: impl IntoIterator<Item = TargetId>) -> Self {
        Self {
            online: RwLock::new(targets.into_iter().collect()),
        }
    }

    pub fn set_online(&self, target: TargetId) {
        if let Ok(mut online) = self.online.write() {
            online.insert(target);
        }
    }

    pub fn set_offline(&self, target: &TargetId) {
        if let Ok(mut online) = self.online.write() {
            online.remove(target);
        }
    }
}

#[async_trait]
impl Presence for StaticPresence {
    async fn is_online(&self, target: &TargetId) -> Result<bool, PresenceError> {
        self.online
            .read()
            .map(|online| online.contains(target))
            .map_err(|_| PresenceError::Lookup("lock poisoned".to_string()))
    }
}

/// Online means at least one open subscription on the target's channel.
#[derive(Debug, Clone)]
pub struct LiveChannelPresence {
    channel: Arc<InMemoryLiveChannel>,
    prefix: String,
}

impl LiveChannelPresence {
    pub fn new(channel: Arc<InMemoryLiveChannel>, prefix: impl Into<String>) -> Self {
        Self {
            channel,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl Presence for LiveChannelPresence {
    async fn is_online(&self, target: &TargetId) -> Result<bool, PresenceError> {
        let key = ChannelKey::for_target(&self.prefix, target);
        Ok(self.channel.subscriber_count(&key) > 0)
    }
}
