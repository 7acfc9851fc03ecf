//! The `Command` value object.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::target::TargetId;
use crate::value_object::ValueObject;

/// Directive a supervisor can issue to a target.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    Start,
    Stop,
}

impl CommandKind {
    /// Stable wire/storage name (`"START"`, `"STOP"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Start => "START",
            CommandKind::Stop => "STOP",
        }
    }
}

impl core::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "START" => Ok(CommandKind::Start),
            "STOP" => Ok(CommandKind::Stop),
            other => Err(DomainError::validation(format!("unknown command kind: {other:?}"))),
        }
    }
}

/// Immutable description of a directive for one target.
///
/// There are no setters; the `with_*` builders consume `self` and are meant
/// to be used only while the command is being assembled at intake/submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    kind: CommandKind,
    target: TargetId,
    issued_at: DateTime<Utc>,
    reason: Option<String>,
    initiator: Option<String>,
}

impl Command {
    pub fn new(kind: CommandKind, target: TargetId, issued_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            target,
            issued_at,
            reason: None,
            initiator: None,
        }
    }

    /// Attach a cause (typically for STOP). Blank reasons are dropped.
    pub fn with_reason(mut self, reason: Option<impl Into<String>>) -> Self {
        self.reason = non_blank(reason);
        self
    }

    /// Attach the identity of the supervisor who issued the command.
    pub fn with_initiator(mut self, initiator: Option<impl Into<String>>) -> Self {
        self.initiator = non_blank(initiator).map(|s| s.to_lowercase());
        self
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn target(&self) -> &TargetId {
        &self.target
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn initiator(&self) -> Option<&str> {
        self.initiator.as_deref()
    }
}

impl ValueObject for Command {}

fn non_blank(value: Option<impl Into<String>>) -> Option<String> {
    value
        .map(Into::into)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
