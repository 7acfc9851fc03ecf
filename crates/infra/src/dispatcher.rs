//! Dual-transport command dispatch.
//!
//! ```text
//! Command
//!   ↓
//! 1. Encode wire payload, derive routing key from the normalized target
//!   ↓
//! 2. Publish on the live channel (bounded by a short timeout)
//!   ↓  delivered to ≥1 subscriber → LIVE, done
//!   ↓  timeout / channel error / nobody subscribed
//! 3. Enqueue the same payload on the durable queue
//!   ↓  accepted → DURABLE_QUEUE, done
//!   ↓  rejected → failure result, caller decides
//! ```
//!
//! Exactly one transport carries the payload per call. The fallback decision
//! is a plain value (`LiveAttempt`) rather than error propagation, so `send`
//! never returns `Err`: both outcomes are variants of `MessagingResult`.

use std::time::Duration;

use tracing::{debug, instrument, warn};

use commandrelay_core::{Command, TargetId};
use commandrelay_events::{
    encode_command, Channel, ChannelKey, DurableQueue, LiveChannel, LiveChannelError, MessagingResult,
    DEFAULT_LIVE_PREFIX,
};

const DEFAULT_LIVE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Routing key prefix (`<prefix>:<target>`).
    pub live_prefix: String,
    /// Upper bound on the live attempt before falling back.
    pub live_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            live_prefix: DEFAULT_LIVE_PREFIX.to_string(),
            live_timeout: DEFAULT_LIVE_TIMEOUT,
        }
    }
}

impl DispatcherConfig {
    pub fn with_live_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.live_prefix = prefix.into();
        self
    }

    pub fn with_live_timeout(mut self, timeout: Duration) -> Self {
        self.live_timeout = timeout;
        self
    }
}

/// Outcome of the live half of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveAttempt {
    Delivered { receivers: u64 },
    NotSubscribed,
    TimedOut,
    Failed(String),
}

impl LiveAttempt {
    /// Classify a (possibly timed out) publish result.
    pub fn classify(outcome: Option<Result<u64, LiveChannelError>>) -> Self {
        match outcome {
            None => LiveAttempt::TimedOut,
            Some(Ok(0)) => LiveAttempt::NotSubscribed,
            Some(Ok(receivers)) => LiveAttempt::Delivered { receivers },
            Some(Err(e)) => LiveAttempt::Failed(e.to_string()),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, LiveAttempt::Delivered { .. })
    }

    /// Why the live attempt did not count, if it didn't.
    pub fn fallback_reason(&self) -> Option<String> {
        match self {
            LiveAttempt::Delivered { .. } => None,
            LiveAttempt::NotSubscribed => Some("target not subscribed".to_string()),
            LiveAttempt::TimedOut => Some("live publish timed out".to_string()),
            LiveAttempt::Failed(e) => Some(e.clone()),
        }
    }
}

/// Live-first, durable-fallback command sender.
///
/// Both transports are long-lived shared clients; the dispatcher itself holds
/// no per-call state and can be shared across tasks.
#[derive(Debug, Clone)]
pub struct Dispatcher<L, Q> {
    live: L,
    queue: Q,
    config: DispatcherConfig,
}

impl<L, Q> Dispatcher<L, Q>
where
    L: LiveChannel,
    Q: DurableQueue,
{
    pub fn new(live: L, queue: Q, config: DispatcherConfig) -> Self {
        Self { live, queue, config }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn live(&self) -> &L {
        &self.live
    }

    pub fn channel_key(&self, target: &TargetId) -> ChannelKey {
        ChannelKey::for_target(&self.config.live_prefix, target)
    }

    /// Publish on the live channel under the configured timeout.
    pub async fn try_live(&self, key: &ChannelKey, payload: &str) -> LiveAttempt {
        let outcome = tokio::time::timeout(self.config.live_timeout, self.live.publish(key, payload))
            .await
            .ok();
        LiveAttempt::classify(outcome)
    }

    #[instrument(skip(self, command), fields(target = %command.target(), kind = %command.kind()))]
    pub async fn send(&self, command: &Command) -> MessagingResult {
        let payload = match encode_command(command) {
            Ok(p) => p,
            Err(e) => return MessagingResult::failed(Channel::Live, e.to_string()),
        };
        let key = self.channel_key(command.target());

        let attempt = self.try_live(&key, &payload).await;
        let Some(reason) = attempt.fallback_reason() else {
            debug!(channel = %key, "command delivered live");
            return MessagingResult::delivered(Channel::Live);
        };

        debug!(channel = %key, reason = %reason, "live delivery failed, falling back to durable queue");

        match self.queue.enqueue(command.target(), &payload).await {
            Ok(message_id) => {
                debug!(message_id = %message_id, "command enqueued");
                MessagingResult::delivered(Channel::DurableQueue)
            }
            Err(e) => {
                warn!(error = %e, live_reason = %reason, "durable enqueue failed");
                MessagingResult::failed(Channel::DurableQueue, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use commandrelay_core::CommandKind;
    use commandrelay_events::{
        decode_command, InMemoryDurableQueue, InMemoryLiveChannel, LiveSubscription,
    };

    /// Never completes a publish.
    struct HangingLive;

    #[async_trait]
    impl LiveChannel for HangingLive {
        async fn publish(&self, _key: &ChannelKey, _payload: &str) -> Result<u64, LiveChannelError> {
            std::future::pending().await
        }

        async fn subscribe(&self, _key: &ChannelKey) -> Result<LiveSubscription, LiveChannelError> {
            Err(LiveChannelError::Unavailable("no subscriptions".to_string()))
        }
    }

    fn command(target: &str) -> Command {
        Command::new(CommandKind::Start, TargetId::parse(target).unwrap(), Utc::now())
            .with_reason(Some("shift start"))
    }

    #[test]
    fn classify_covers_every_live_outcome() {
        assert_eq!(LiveAttempt::classify(None), LiveAttempt::TimedOut);
        assert_eq!(LiveAttempt::classify(Some(Ok(0))), LiveAttempt::NotSubscribed);
        assert_eq!(
            LiveAttempt::classify(Some(Ok(2))),
            LiveAttempt::Delivered { receivers: 2 }
        );
        assert!(matches!(
            LiveAttempt::classify(Some(Err(LiveChannelError::Unavailable("down".into())))),
            LiveAttempt::Failed(_)
        ));
        assert!(LiveAttempt::classify(Some(Ok(0))).fallback_reason().is_some());
        assert!(LiveAttempt::classify(Some(Ok(1))).fallback_reason().is_none());
    }

    #[tokio::test]
    async fn subscribed_target_gets_live_delivery_only() {
        let live = Arc::new(InMemoryLiveChannel::new());
        let queue = Arc::new(InMemoryDurableQueue::new());
        let dispatcher = Dispatcher::new(live.clone(), queue.clone(), DispatcherConfig::default());

        let cmd = command("pso@x.com");
        let mut sub = live.subscribe(&dispatcher.channel_key(cmd.target())).await.unwrap();

        let result = dispatcher.send(&cmd).await;
        assert_eq!(result, MessagingResult::delivered(Channel::Live));
        assert!(queue.enqueued().is_empty());

        let received = decode_command(&sub.recv().await.unwrap()).unwrap();
        assert_eq!(received.kind(), CommandKind::Start);
        assert_eq!(received.reason(), Some("shift start"));
    }

    #[tokio::test]
    async fn failing_live_channel_falls_back_to_durable_queue_once() {
        let live = Arc::new(InMemoryLiveChannel::unavailable());
        let queue = Arc::new(InMemoryDurableQueue::new());
        let dispatcher = Dispatcher::new(live, queue.clone(), DispatcherConfig::default());

        let cmd = command("pso@x.com");
        let result = dispatcher.send(&cmd).await;

        assert_eq!(result.channel(), Channel::DurableQueue);
        assert!(result.success());
        let enqueued = queue.enqueued();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].1, encode_command(&cmd).unwrap());
    }

    #[tokio::test]
    async fn unsubscribed_target_falls_back() {
        let dispatcher = Dispatcher::new(
            Arc::new(InMemoryLiveChannel::new()),
            Arc::new(InMemoryDurableQueue::new()),
            DispatcherConfig::default(),
        );
        let result = dispatcher.send(&command("offline@x.com")).await;
        assert_eq!(result, MessagingResult::delivered(Channel::DurableQueue));
    }

    #[tokio::test]
    async fn hung_live_channel_times_out_then_falls_back() {
        let queue = Arc::new(InMemoryDurableQueue::new());
        let dispatcher = Dispatcher::new(
            HangingLive,
            queue.clone(),
            DispatcherConfig::default().with_live_timeout(Duration::from_millis(20)),
        );

        let result = dispatcher.send(&command("pso@x.com")).await;
        assert_eq!(result, MessagingResult::delivered(Channel::DurableQueue));
        assert_eq!(queue.enqueued().len(), 1);
    }

    #[tokio::test]
    async fn both_transports_down_reports_failure_with_detail() {
        let queue = Arc::new(InMemoryDurableQueue::new());
        queue.set_failing(true);
        let dispatcher = Dispatcher::new(
            Arc::new(InMemoryLiveChannel::unavailable()),
            queue,
            DispatcherConfig::default(),
        );

        let result = dispatcher.send(&command("pso@x.com")).await;
        assert!(!result.success());
        assert_eq!(result.channel(), Channel::DurableQueue);
        assert!(!result.error_detail().unwrap().is_empty());
    }

    #[tokio::test]
    async fn routing_key_ignores_case_and_whitespace() {
        let live = Arc::new(InMemoryLiveChannel::new());
        let dispatcher = Dispatcher::new(
            live.clone(),
            Arc::new(InMemoryDurableQueue::new()),
            DispatcherConfig::default(),
        );
        let mut sub = live
            .subscribe(&ChannelKey::for_target("commands", &TargetId::parse("user@example.com").unwrap()))
            .await
            .unwrap();

        let result = dispatcher.send(&command("User@Example.com ")).await;
        assert_eq!(result.channel(), Channel::Live);
        assert!(sub.recv().await.is_some());
        assert_eq!(
            dispatcher.channel_key(&TargetId::parse("User@Example.com ").unwrap()),
            dispatcher.channel_key(&TargetId::parse("user@example.com").unwrap())
        );
    }
}
