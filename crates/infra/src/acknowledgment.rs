//! Batch acknowledgment of pending commands.
//!
//! - Ids that are malformed or unknown are skipped, never an error
//! - Every distinct target in the batch is authorized before anything is
//!   written, so a rejected batch has no effect
//! - The store transition is conditional on `acknowledged_at IS NULL`, so a
//!   repeated acknowledgment counts 0 and `updated_count` is exact

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use commandrelay_auth::{authorize, AcknowledgmentAuthorizer, AuthzError, Permission, Principal};
use commandrelay_core::{Entity, PendingCommand, PendingCommandId, TargetId};

use crate::pending_store::{PendingCommandStore, PendingStoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AcknowledgeError {
    #[error("acknowledgment batch is empty")]
    EmptyBatch,

    #[error(transparent)]
    Forbidden(#[from] AuthzError),

    #[error(transparent)]
    Store(#[from] PendingStoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeResult {
    pub updated_count: u64,
}

#[derive(Clone)]
pub struct AcknowledgmentService {
    store: Arc<dyn PendingCommandStore>,
    authorizer: Arc<dyn AcknowledgmentAuthorizer>,
}

impl core::fmt::Debug for AcknowledgmentService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AcknowledgmentService").finish_non_exhaustive()
    }
}

impl AcknowledgmentService {
    pub fn new(store: Arc<dyn PendingCommandStore>, authorizer: Arc<dyn AcknowledgmentAuthorizer>) -> Self {
        Self { store, authorizer }
    }

    /// Acknowledge raw ids as received from a caller.
    #[instrument(skip(self, ids, caller), fields(caller = %caller.identity(), requested = ids.len()), err)]
    pub async fn acknowledge<S: AsRef<str>>(
        &self,
        ids: &[S],
        caller: &Principal,
    ) -> Result<AcknowledgeResult, AcknowledgeError> {
        if ids.is_empty() {
            return Err(AcknowledgeError::EmptyBatch);
        }

        let parsed: Vec<PendingCommandId> = ids
            .iter()
            .map(<S as AsRef<str>>::as_ref)
            .filter_map(|raw: &str| match raw.parse::<PendingCommandId>() {
                Ok(id) => Some(id),
                Err(e) => {
                    debug!(id = raw, error = %e, "skipping malformed pending command id");
                    None
                }
            })
            .collect();

        self.acknowledge_ids(&parsed, caller).await
    }

    pub async fn acknowledge_ids(
        &self,
        ids: &[PendingCommandId],
        caller: &Principal,
    ) -> Result<AcknowledgeResult, AcknowledgeError> {
        let unique: BTreeSet<PendingCommandId> = ids.iter().copied().collect();
        if unique.is_empty() {
            return Ok(AcknowledgeResult { updated_count: 0 });
        }

        let wanted: Vec<PendingCommandId> = unique.into_iter().collect();
        let rows = self.store.find_by_ids(&wanted).await?;

        let targets: BTreeSet<&TargetId> = rows.iter().map(PendingCommand::target).collect();
        for target in targets {
            self.authorizer.authorize_acknowledgment(caller, target)?;
        }

        let found: Vec<PendingCommandId> = rows.iter().map(|r| *r.id()).collect();
        let updated_count = self.store.acknowledge(&found, Utc::now()).await?;

        info!(
            requested = wanted.len(),
            found = found.len(),
            updated_count,
            "pending commands acknowledged"
        );
        Ok(AcknowledgeResult { updated_count })
    }

    /// Unacknowledged commands for `target` (the caller's own when `None`).
    pub async fn pending_for(
        &self,
        caller: &Principal,
        target: Option<&TargetId>,
        limit: usize,
    ) -> Result<Vec<PendingCommand>, AcknowledgeError> {
        let target = target.unwrap_or(caller.identity());
        if !caller.owns(target) {
            authorize(caller, &Permission::COMMANDS_READ_ANY)
                .or_else(|_| self.authorizer.authorize_acknowledgment(caller, target))?;
        }
        Ok(self.store.list_pending(target, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commandrelay_auth::{RoleBasedAuthorizer, Role};
    use commandrelay_core::{Command, CommandKind};

    use crate::pending_store::InMemoryPendingCommandStore;

    fn target(raw: &str) -> TargetId {
        TargetId::parse(raw).unwrap()
    }

    fn caller(email: &str, roles: &[Role]) -> Principal {
        Principal::new(target(email), roles.to_vec())
    }

    async fn seed(store: &InMemoryPendingCommandStore, email: &str) -> PendingCommand {
        let cmd = Command::new(CommandKind::Start, target(email), Utc::now());
        let rec = PendingCommand::new(&cmd, "{}", Utc::now());
        store.insert(&rec).await.unwrap();
        rec
    }

    fn service(store: Arc<InMemoryPendingCommandStore>) -> AcknowledgmentService {
        AcknowledgmentService::new(store, Arc::new(RoleBasedAuthorizer::default()))
    }

    #[tokio::test]
    async fn second_acknowledgment_counts_zero() {
        let store = Arc::new(InMemoryPendingCommandStore::new());
        let rec = seed(&store, "pso@x.com").await;
        let svc = service(store.clone());
        let owner = caller("pso@x.com", &[Role::EMPLOYEE]);
        let ids = [rec.id().to_string()];

        assert_eq!(svc.acknowledge(&ids, &owner).await.unwrap().updated_count, 1);
        assert_eq!(svc.acknowledge(&ids, &owner).await.unwrap().updated_count, 0);
        assert!(store.get(rec.id()).unwrap().acknowledged_at().is_some());
    }

    #[tokio::test]
    async fn unknown_and_malformed_ids_are_skipped() {
        let store = Arc::new(InMemoryPendingCommandStore::new());
        let rec = seed(&store, "pso@x.com").await;
        let svc = service(store);
        let owner = caller("pso@x.com", &[]);

        let ids = vec![
            rec.id().to_string(),
            PendingCommandId::new().to_string(),
            "not-a-uuid".to_string(),
        ];
        assert_eq!(svc.acknowledge(&ids, &owner).await.unwrap().updated_count, 1);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let svc = service(Arc::new(InMemoryPendingCommandStore::new()));
        let ids: [&str; 0] = [];
        assert_eq!(
            svc.acknowledge(&ids, &caller("pso@x.com", &[])).await,
            Err(AcknowledgeError::EmptyBatch)
        );
    }

    #[tokio::test]
    async fn foreign_target_is_forbidden_without_partial_effect() {
        let store = Arc::new(InMemoryPendingCommandStore::new());
        let own = seed(&store, "pso@x.com").await;
        let foreign = seed(&store, "other@x.com").await;
        let svc = service(store.clone());

        let ids = [own.id().to_string(), foreign.id().to_string()];
        let err = svc.acknowledge(&ids, &caller("pso@x.com", &[Role::EMPLOYEE])).await.unwrap_err();

        assert!(matches!(err, AcknowledgeError::Forbidden(_)));
        assert!(!store.get(own.id()).unwrap().is_acknowledged());
        assert!(!store.get(foreign.id()).unwrap().is_acknowledged());
    }

    #[tokio::test]
    async fn supervisor_acknowledges_across_targets() {
        let store = Arc::new(InMemoryPendingCommandStore::new());
        let a = seed(&store, "a@x.com").await;
        let b = seed(&store, "b@x.com").await;
        let svc = service(store);

        let ids = [a.id().to_string(), b.id().to_string(), a.id().to_string()];
        let result = svc.acknowledge(&ids, &caller("boss@x.com", &[Role::SUPERVISOR])).await.unwrap();
        assert_eq!(result, AcknowledgeResult { updated_count: 2 });
    }

    #[tokio::test]
    async fn pending_for_defaults_to_caller_and_guards_others() {
        let store = Arc::new(InMemoryPendingCommandStore::new());
        seed(&store, "pso@x.com").await;
        seed(&store, "other@x.com").await;
        let svc = service(store);

        let me = caller("pso@x.com", &[]);
        assert_eq!(svc.pending_for(&me, None, 10).await.unwrap().len(), 1);
        assert!(svc.pending_for(&me, Some(&target("other@x.com")), 10).await.is_err());

        let observer = caller("watch@x.com", &[Role::OBSERVER]);
        assert_eq!(
            svc.pending_for(&observer, Some(&target("other@x.com")), 10).await.unwrap().len(),
            1
        );
    }

    #[test]
    fn result_serializes_as_updated_count() {
        let json = serde_json::to_string(&AcknowledgeResult { updated_count: 3 }).unwrap();
        assert_eq!(json, r#"{"updatedCount":3}"#);
    }
}
