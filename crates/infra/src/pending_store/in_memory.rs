use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use commandrelay_core::{Entity, PendingCommand, PendingCommandId, TargetId};

use super::r#trait::{PendingCommandStore, PendingStoreError, PurgeCutoffs, PurgeReport};

/// In-memory pending command store.
///
/// Intended for tests/dev. Ids are UUIDv7, so map order is creation order.
#[derive(Debug, Default)]
pub struct InMemoryPendingCommandStore {
    rows: RwLock<BTreeMap<PendingCommandId, PendingCommand>>,
}

impl InMemoryPendingCommandStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row.
    pub fn all(&self) -> Vec<PendingCommand> {
        self.rows
            .read()
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, id: &PendingCommandId) -> Option<PendingCommand> {
        self.rows.read().ok()?.get(id).cloned()
    }

    fn poisoned() -> PendingStoreError {
        PendingStoreError::Unavailable("lock poisoned".to_string())
    }
}

#[async_trait]
impl PendingCommandStore for InMemoryPendingCommandStore {
    async fn insert(&self, record: &PendingCommand) -> Result<(), PendingStoreError> {
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        if rows.contains_key(record.id()) {
            return Err(PendingStoreError::Duplicate(*record.id()));
        }
        rows.insert(*record.id(), record.clone());
        Ok(())
    }

    async fn list_pending(&self, target: &TargetId, limit: usize) -> Result<Vec<PendingCommand>, PendingStoreError> {
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        let mut pending: Vec<PendingCommand> = rows
            .values()
            .filter(|r| r.target() == target && !r.is_acknowledged())
            .cloned()
            .collect();
        pending.sort_by_key(|r| (r.created_at(), *r.id()));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn has_pending(&self, target: &TargetId) -> Result<bool, PendingStoreError> {
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows
            .values()
            .any(|r| r.target() == target && !r.is_acknowledged()))
    }

    async fn find_by_ids(&self, ids: &[PendingCommandId]) -> Result<Vec<PendingCommand>, PendingStoreError> {
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        let wanted: HashSet<&PendingCommandId> = ids.iter().collect();
        Ok(wanted.into_iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    async fn acknowledge(&self, ids: &[PendingCommandId], at: DateTime<Utc>) -> Result<u64, PendingStoreError> {
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        let unique: HashSet<&PendingCommandId> = ids.iter().collect();

        let mut updated = 0u64;
        for id in unique {
            if let Some(row) = rows.get_mut(id) {
                if row.acknowledge(at) {
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn purge(&self, cutoffs: PurgeCutoffs) -> Result<PurgeReport, PendingStoreError> {
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        let mut report = PurgeReport::default();

        rows.retain(|_, row| match row.acknowledged_at() {
            Some(at) if at < cutoffs.acknowledged_before => {
                report.acknowledged_removed += 1;
                false
            }
            None if row.created_at() < cutoffs.created_before => {
                report.expired_removed += 1;
                false
            }
            _ => true,
        });

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use commandrelay_core::{Command, CommandKind};

    fn target(raw: &str) -> TargetId {
        TargetId::parse(raw).unwrap()
    }

    fn record_for(raw: &str, created_at: DateTime<Utc>) -> PendingCommand {
        let cmd = Command::new(CommandKind::Stop, target(raw), created_at);
        PendingCommand::new(&cmd, "{}", created_at)
    }

    #[tokio::test]
    async fn insert_then_list_pending_for_target_only() {
        let store = InMemoryPendingCommandStore::new();
        let now = Utc::now();
        let a1 = record_for("a@x.com", now - Duration::minutes(2));
        let a2 = record_for("a@x.com", now - Duration::minutes(1));
        let b = record_for("b@x.com", now);
        for r in [&a2, &b, &a1] {
            store.insert(r).await.unwrap();
        }

        let pending = store.list_pending(&target("a@x.com"), 10).await.unwrap();
        assert_eq!(pending.iter().map(|r| *r.id()).collect::<Vec<_>>(), vec![*a1.id(), *a2.id()]);
        assert_eq!(store.list_pending(&target("a@x.com"), 1).await.unwrap().len(), 1);
        assert!(store.has_pending(&target("b@x.com")).await.unwrap());
        assert!(!store.has_pending(&target("c@x.com")).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = InMemoryPendingCommandStore::new();
        let rec = record_for("a@x.com", Utc::now());
        store.insert(&rec).await.unwrap();
        assert_eq!(store.insert(&rec).await, Err(PendingStoreError::Duplicate(*rec.id())));
    }

    #[tokio::test]
    async fn acknowledge_transitions_once_and_ignores_unknown_ids() {
        let store = InMemoryPendingCommandStore::new();
        let rec = record_for("a@x.com", Utc::now());
        store.insert(&rec).await.unwrap();

        let ids = [*rec.id(), PendingCommandId::new(), *rec.id()];
        assert_eq!(store.acknowledge(&ids, Utc::now()).await.unwrap(), 1);
        assert_eq!(store.acknowledge(&ids, Utc::now()).await.unwrap(), 0);
        assert!(store.get(rec.id()).unwrap().is_acknowledged());
        assert!(!store.has_pending(&target("a@x.com")).await.unwrap());
    }

    #[tokio::test]
    async fn purge_applies_both_cutoffs() {
        let store = InMemoryPendingCommandStore::new();
        let now = Utc::now();

        let stale = record_for("a@x.com", now - Duration::days(40));
        let fresh = record_for("a@x.com", now);
        let old_ack = record_for("a@x.com", now - Duration::days(10));
        let new_ack = record_for("a@x.com", now - Duration::days(1));
        for r in [&stale, &fresh, &old_ack, &new_ack] {
            store.insert(r).await.unwrap();
        }
        store.acknowledge(&[*old_ack.id()], now - Duration::days(9)).await.unwrap();
        store.acknowledge(&[*new_ack.id()], now - Duration::hours(1)).await.unwrap();

        let cutoffs = super::super::RetentionPolicy::default().cutoffs(now);
        let report = store.purge(cutoffs).await.unwrap();

        assert_eq!(report, PurgeReport { acknowledged_removed: 1, expired_removed: 1 });
        let remaining: HashSet<PendingCommandId> = store.all().iter().map(|r| *r.id()).collect();
        assert_eq!(remaining, HashSet::from([*fresh.id(), *new_ack.id()]));
    }
}
