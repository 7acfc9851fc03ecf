//! Live publish/subscribe channel (best-effort accelerator).
//!
//! The live channel reaches targets that currently hold a connection. It is
//! **not** a correctness mechanism:
//!
//! - **No durability**: a payload published while nobody listens is gone
//! - **No ordering** relative to the durable queue
//! - **Fast failure**: callers wrap `publish` in a short timeout
//!
//! Anything that must not be lost goes through the durable queue and the
//! pending-command store; the live channel only shortens delivery latency.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::channel::ChannelKey;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LiveChannelError {
    #[error("live channel unavailable: {0}")]
    Unavailable(String),

    #[error("live channel command failed: {0}")]
    Command(String),
}

/// A target's view of its live channel.
///
/// Payloads arrive as raw JSON strings in publish order for this key. Dropping
/// the subscription unsubscribes.
#[derive(Debug)]
pub struct LiveSubscription {
    receiver: mpsc::Receiver<String>,
}

impl LiveSubscription {
    pub fn new(receiver: mpsc::Receiver<String>) -> Self {
        Self { receiver }
    }

    /// Wait for the next payload; `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }

    pub fn into_receiver(self) -> mpsc::Receiver<String> {
        self.receiver
    }
}

/// Publish/subscribe transport keyed by `ChannelKey`.
///
/// Implementations are long-lived and shared across concurrent invocations,
/// so they must not keep per-call mutable state.
#[async_trait]
pub trait LiveChannel: Send + Sync {
    /// Publish `payload` to `key`, returning how many subscribers received it.
    ///
    /// `Ok(0)` means the target is not subscribed; whether that counts as a
    /// failure is the caller's decision.
    async fn publish(&self, key: &ChannelKey, payload: &str) -> Result<u64, LiveChannelError>;

    async fn subscribe(&self, key: &ChannelKey) -> Result<LiveSubscription, LiveChannelError>;
}

#[async_trait]
impl<T> LiveChannel for Arc<T>
where
    T: LiveChannel + ?Sized,
{
    async fn publish(&self, key: &ChannelKey, payload: &str) -> Result<u64, LiveChannelError> {
        (**self).publish(key, payload).await
    }

    async fn subscribe(&self, key: &ChannelKey) -> Result<LiveSubscription, LiveChannelError> {
        (**self).subscribe(key).await
    }
}
