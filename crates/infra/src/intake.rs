//! Command intake: the durable-queue consumer.
//!
//! One invocation per queued message, no shared mutable state between
//! invocations:
//!
//! 1. Decode and validate the message (malformed → permanent failure)
//! 2. Resolve the target in the user directory (unknown → transient failure)
//! 3. Insert a `PendingCommand` row (failure → transient)
//! 4. If the target looks online, resend the payload on the live channel
//!    without waiting for the outcome
//!
//! Success is reported once step 3 completes. Retry and dead-lettering belong
//! to the queue consumer (`workers::IntakeWorker`), never to this service.
//!
//! The resend goes straight to the live channel, not through the dispatcher:
//! a durable fallback here would enqueue the command again and create a
//! second pending row for it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use commandrelay_core::{Entity, PendingCommand, PendingCommandId, TargetId};
use commandrelay_events::{decode_command, encode_command, ChannelKey, LiveChannel};

use crate::directory::{DirectoryError, UserDirectory};
use crate::dispatcher::LiveAttempt;
use crate::pending_store::{PendingCommandStore, PendingStoreError};
use crate::presence::Presence;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntakeError {
    #[error("malformed command message: {0}")]
    Malformed(String),

    #[error("target '{0}' not found in user directory")]
    UnknownTarget(TargetId),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Store(#[from] PendingStoreError),
}

impl IntakeError {
    /// Permanent failures are never retried and go straight to the dead-letter sink.
    pub fn is_permanent(&self) -> bool {
        matches!(self, IntakeError::Malformed(_))
    }
}

/// What a successful intake produced.
#[derive(Debug)]
pub struct IntakeReceipt {
    pub pending_id: PendingCommandId,
    pub target: TargetId,
    /// Present when a live resend was started.
    pub resend: Option<JoinHandle<LiveAttempt>>,
}

#[derive(Clone)]
pub struct IntakeService {
    directory: Arc<dyn UserDirectory>,
    store: Arc<dyn PendingCommandStore>,
    presence: Arc<dyn Presence>,
    live: Arc<dyn LiveChannel>,
    live_prefix: String,
    live_timeout: Duration,
}

impl core::fmt::Debug for IntakeService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IntakeService")
            .field("live_prefix", &self.live_prefix)
            .field("live_timeout", &self.live_timeout)
            .finish_non_exhaustive()
    }
}

impl IntakeService {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        store: Arc<dyn PendingCommandStore>,
        presence: Arc<dyn Presence>,
        live: Arc<dyn LiveChannel>,
        live_prefix: impl Into<String>,
        live_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            store,
            presence,
            live,
            live_prefix: live_prefix.into(),
            live_timeout,
        }
    }

    #[instrument(skip(self, raw), fields(bytes = raw.len()), err)]
    pub async fn on_message(&self, raw: &str) -> Result<IntakeReceipt, IntakeError> {
        let command = decode_command(raw).map_err(|e| IntakeError::Malformed(e.to_string()))?;
        let target = command.target().clone();

        if self.directory.resolve(&target).await?.is_none() {
            return Err(IntakeError::UnknownTarget(target));
        }

        let payload = encode_command(&command).map_err(|e| IntakeError::Malformed(e.to_string()))?;
        let record = PendingCommand::new(&command, payload.clone(), Utc::now());
        self.store.insert(&record).await?;
        let pending_id = *record.id();

        info!(pending_id = %pending_id, target = %target, kind = %command.kind(), "pending command recorded");

        let online = match self.presence.is_online(&target).await {
            Ok(online) => online,
            Err(e) => {
                warn!(error = %e, target = %target, "presence lookup failed; treating target as offline");
                false
            }
        };

        let resend = online.then(|| self.spawn_resend(&target, pending_id, payload));

        Ok(IntakeReceipt {
            pending_id,
            target,
            resend,
        })
    }

    fn spawn_resend(&self, target: &TargetId, pending_id: PendingCommandId, payload: String) -> JoinHandle<LiveAttempt> {
        let live = self.live.clone();
        let key = ChannelKey::for_target(&self.live_prefix, target);
        let timeout = self.live_timeout;

        tokio::spawn(async move {
            let outcome = tokio::time::timeout(timeout, live.publish(&key, &payload)).await.ok();
            let attempt = LiveAttempt::classify(outcome);
            match attempt.fallback_reason() {
                None => debug!(pending_id = %pending_id, channel = %key, "live resend delivered"),
                Some(reason) => {
                    debug!(pending_id = %pending_id, channel = %key, reason = %reason, "live resend not delivered; row stays pending")
                }
            }
            attempt
        })
    }
}
