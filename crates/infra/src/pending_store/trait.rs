use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use commandrelay_core::{PendingCommand, PendingCommandId, TargetId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PendingStoreError {
    #[error("pending store unavailable: {0}")]
    Unavailable(String),

    #[error("pending store query failed: {0}")]
    Query(String),

    #[error("pending command {0} already exists")]
    Duplicate(PendingCommandId),

    #[error("corrupt pending command row: {0}")]
    Corrupt(String),
}

/// How long rows are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Acknowledged rows are removed this long after `acknowledged_at`.
    pub acknowledged_retention: Duration,
    /// Unacknowledged rows older than this are expired.
    pub pending_ttl: Duration,
}

impl RetentionPolicy {
    /// A window reaching past the earliest representable instant purges nothing.
    pub fn cutoffs(&self, now: DateTime<Utc>) -> PurgeCutoffs {
        let before = |window: Duration| now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        PurgeCutoffs {
            acknowledged_before: before(self.acknowledged_retention),
            created_before: before(self.pending_ttl),
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            acknowledged_retention: Duration::hours(168),
            pending_ttl: Duration::hours(720),
        }
    }
}

/// Absolute timestamps a purge works against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeCutoffs {
    pub acknowledged_before: DateTime<Utc>,
    pub created_before: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub acknowledged_removed: u64,
    pub expired_removed: u64,
}

impl PurgeReport {
    pub fn total(&self) -> u64 {
        self.acknowledged_removed + self.expired_removed
    }
}

/// Persistence boundary for `PendingCommand` rows.
///
/// Implementations must be safe for concurrent use and must not hold an
/// in-process lock across any await point.
#[async_trait]
pub trait PendingCommandStore: Send + Sync {
    /// Append a new row.
    async fn insert(&self, record: &PendingCommand) -> Result<(), PendingStoreError>;

    /// Unacknowledged rows for `target`, oldest first.
    async fn list_pending(&self, target: &TargetId, limit: usize) -> Result<Vec<PendingCommand>, PendingStoreError>;

    async fn has_pending(&self, target: &TargetId) -> Result<bool, PendingStoreError>;

    /// Rows matching `ids` in any state. Unknown ids are omitted.
    async fn find_by_ids(&self, ids: &[PendingCommandId]) -> Result<Vec<PendingCommand>, PendingStoreError>;

    /// Set `acknowledged_at = at` on every listed row that is still
    /// unacknowledged. Returns how many rows transitioned.
    async fn acknowledge(&self, ids: &[PendingCommandId], at: DateTime<Utc>) -> Result<u64, PendingStoreError>;

    async fn purge(&self, cutoffs: PurgeCutoffs) -> Result<PurgeReport, PendingStoreError>;
}

#[async_trait]
impl<T> PendingCommandStore for Arc<T>
where
    T: PendingCommandStore + ?Sized,
{
    async fn insert(&self, record: &PendingCommand) -> Result<(), PendingStoreError> {
        (**self).insert(record).await
    }

    async fn list_pending(&self, target: &TargetId, limit: usize) -> Result<Vec<PendingCommand>, PendingStoreError> {
        (**self).list_pending(target, limit).await
    }

    async fn has_pending(&self, target: &TargetId) -> Result<bool, PendingStoreError> {
        (**self).has_pending(target).await
    }

    async fn find_by_ids(&self, ids: &[PendingCommandId]) -> Result<Vec<PendingCommand>, PendingStoreError> {
        (**self).find_by_ids(ids).await
    }

    async fn acknowledge(&self, ids: &[PendingCommandId], at: DateTime<Utc>) -> Result<u64, PendingStoreError> {
        (**self).acknowledge(ids, at).await
    }

    async fn purge(&self, cutoffs: PurgeCutoffs) -> Result<PurgeReport, PendingStoreError> {
        (**self).purge(cutoffs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoffs_subtract_the_windows() {
        let now = Utc::now();
        let cutoffs = RetentionPolicy::default().cutoffs(now);
        assert_eq!(cutoffs.acknowledged_before, now - Duration::hours(168));
        assert_eq!(cutoffs.created_before, now - Duration::hours(720));
    }

    #[test]
    fn oversized_window_saturates_instead_of_overflowing() {
        let policy = RetentionPolicy {
            acknowledged_retention: Duration::hours(1),
            pending_ttl: Duration::days(365 * 1_000_000),
        };
        let cutoffs = policy.cutoffs(Utc::now());
        assert_eq!(cutoffs.created_before, DateTime::<Utc>::MIN_UTC);
    }
}
