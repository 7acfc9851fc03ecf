//! Durable record of a command awaiting acknowledgment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandKind};
use crate::entity::Entity;
use crate::id::PendingCommandId;
use crate::target::TargetId;

/// A command accepted at intake and not yet confirmed consumed.
///
/// Rows are append-only; the single permitted mutation is the one-time
/// transition of `acknowledged_at` from `None` to `Some`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCommand {
    id: PendingCommandId,
    target: TargetId,
    kind: CommandKind,
    /// Serialized wire payload, replayed verbatim to the target.
    payload: String,
    created_at: DateTime<Utc>,
    acknowledged_at: Option<DateTime<Utc>>,
}

impl PendingCommand {
    /// New unacknowledged record for `command` with a fresh id.
    pub fn new(command: &Command, payload: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: PendingCommandId::new(),
            target: command.target().clone(),
            kind: command.kind(),
            payload: payload.into(),
            created_at,
            acknowledged_at: None,
        }
    }

    /// Rebuild a record loaded from storage.
    pub fn from_parts(
        id: PendingCommandId,
        target: TargetId,
        kind: CommandKind,
        payload: String,
        created_at: DateTime<Utc>,
        acknowledged_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            target,
            kind,
            payload,
            created_at,
            acknowledged_at,
        }
    }

    pub fn target(&self) -> &TargetId {
        &self.target
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn acknowledged_at(&self) -> Option<DateTime<Utc>> {
        self.acknowledged_at
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }

    /// Mark acknowledged. Returns `true` only on the first call; later calls
    /// leave the original timestamp untouched.
    pub fn acknowledge(&mut self, at: DateTime<Utc>) -> bool {
        if self.acknowledged_at.is_some() {
            return false;
        }
        self.acknowledged_at = Some(at);
        true
    }
}

impl Entity for PendingCommand {
    type Id = PendingCommandId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
