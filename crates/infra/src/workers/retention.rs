//! Periodic purge of old pending-command rows.
//!
//! Acknowledged rows are removed after the acknowledged retention window;
//! unacknowledged rows past the pending TTL are expired and reported at warn.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pending_store::{PendingCommandStore, PendingStoreError, PurgeReport, RetentionPolicy};

#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper. Returns `false` if the task had died (e.g. panicked).
    pub async fn shutdown(mut self) -> bool {
        let _ = self.shutdown.send(true);
        match self.join.take() {
            Some(j) => match j.await {
                Ok(()) => true,
                Err(e) => {
                    error!(error = %e, "retention sweeper task failed");
                    false
                }
            },
            None => true,
        }
    }
}

#[derive(Clone)]
pub struct RetentionSweeper {
    store: Arc<dyn PendingCommandStore>,
    policy: RetentionPolicy,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn PendingCommandStore>, policy: RetentionPolicy) -> Self {
        Self { store, policy }
    }

    /// Run one purge against the current time.
    pub async fn sweep_once(&self) -> Result<PurgeReport, PendingStoreError> {
        let report = self.store.purge(self.policy.cutoffs(Utc::now())).await?;

        if report.expired_removed > 0 {
            warn!(
                expired = report.expired_removed,
                "expired unacknowledged pending commands"
            );
        }
        if report.total() > 0 {
            info!(
                acknowledged = report.acknowledged_removed,
                expired = report.expired_removed,
                "retention sweep removed rows"
            );
        } else {
            debug!("retention sweep found nothing to remove");
        }
        Ok(report)
    }

    /// Sweep every `interval` until shut down. The first sweep runs immediately.
    pub fn spawn(self, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            error!(error = %e, "retention sweep failed");
                        }
                    }
                }
            }
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use chrono::DateTime;
    use commandrelay_core::{Command, CommandKind, PendingCommand, PendingCommandId, TargetId};

    use crate::pending_store::{InMemoryPendingCommandStore, PurgeCutoffs};

    async fn seed_stale(store: &InMemoryPendingCommandStore) {
        let created = Utc::now() - ChronoDuration::days(60);
        let cmd = Command::new(CommandKind::Stop, TargetId::parse("pso@x.com").unwrap(), created);
        store.insert(&PendingCommand::new(&cmd, "{}", created)).await.unwrap();
    }

    #[tokio::test]
    async fn sweep_once_expires_stale_rows() {
        let store = Arc::new(InMemoryPendingCommandStore::new());
        seed_stale(&store).await;

        let sweeper = RetentionSweeper::new(store.clone(), RetentionPolicy::default());
        let report = sweeper.sweep_once().await.unwrap();

        assert_eq!(report.expired_removed, 1);
        assert!(store.all().is_empty());
    }

    #[tokio::test]
    async fn spawned_sweeper_runs_and_shuts_down() {
        let store = Arc::new(InMemoryPendingCommandStore::new());
        seed_stale(&store).await;

        let handle = RetentionSweeper::new(store.clone(), RetentionPolicy::default())
            .spawn(Duration::from_secs(3600));

        for _ in 0..50 {
            if store.all().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store.all().is_empty());
        assert!(handle.shutdown().await);
    }

    struct PanickingStore;

    #[async_trait::async_trait]
    impl PendingCommandStore for PanickingStore {
        async fn insert(&self, _record: &PendingCommand) -> Result<(), PendingStoreError> {
            Ok(())
        }

        async fn list_pending(&self, _target: &TargetId, _limit: usize) -> Result<Vec<PendingCommand>, PendingStoreError> {
            Ok(Vec::new())
        }

        async fn has_pending(&self, _target: &TargetId) -> Result<bool, PendingStoreError> {
            Ok(false)
        }

        async fn find_by_ids(&self, _ids: &[PendingCommandId]) -> Result<Vec<PendingCommand>, PendingStoreError> {
            Ok(Vec::new())
        }

        async fn acknowledge(&self, _ids: &[PendingCommandId], _at: DateTime<Utc>) -> Result<u64, PendingStoreError> {
            Ok(0)
        }

        async fn purge(&self, _cutoffs: PurgeCutoffs) -> Result<PurgeReport, PendingStoreError> {
            panic!("purge blew up");
        }
    }

    #[tokio::test]
    async fn shutdown_reports_a_dead_sweeper_task() {
        let handle = RetentionSweeper::new(Arc::new(PanickingStore), RetentionPolicy::default())
            .spawn(Duration::from_secs(3600));

        // The first tick fires immediately and panics the task.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.shutdown().await);
    }
}
