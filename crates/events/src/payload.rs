//! JSON wire format for commands.
//!
//! One shape serves both transports:
//!
//! ```text
//! { "command": "START"|"STOP", "employeeEmail": "...", "timestamp": "<ISO-8601>",
//!   "reason"?: "...", "initiatedByEmail"?: "..." }
//! ```
//!
//! Producers on the durable queue omit `initiatedByEmail`; it is accepted but
//! not required.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use commandrelay_core::{Command, CommandKind, TargetId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    pub command: CommandKind,
    pub employee_email: TargetId,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiated_by_email: Option<String>,
}

#[derive(Debug, Error)]
pub enum PayloadError {
    /// Not valid JSON, missing fields, unknown command kind, bad timestamp.
    #[error("malformed command payload: {0}")]
    Malformed(String),

    #[error("failed to encode command payload: {0}")]
    Encode(String),
}

impl CommandPayload {
    pub fn from_command(command: &Command) -> Self {
        Self {
            command: command.kind(),
            employee_email: command.target().clone(),
            timestamp: command.issued_at(),
            reason: command.reason().map(str::to_string),
            initiated_by_email: command.initiator().map(str::to_string),
        }
    }

    pub fn into_command(self) -> Command {
        Command::new(self.command, self.employee_email, self.timestamp)
            .with_reason(self.reason)
            .with_initiator(self.initiated_by_email)
    }

    pub fn decode(raw: &str) -> Result<Self, PayloadError> {
        serde_json::from_str(raw).map_err(|e| PayloadError::Malformed(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, PayloadError> {
        serde_json::to_string(self).map_err(|e| PayloadError::Encode(e.to_string()))
    }
}

/// Serialize a command to its wire payload.
pub fn encode_command(command: &Command) -> Result<String, PayloadError> {
    CommandPayload::from_command(command).encode()
}

/// Parse and validate a raw wire payload into a `Command`.
pub fn decode_command(raw: &str) -> Result<Command, PayloadError> {
    CommandPayload::decode(raw).map(CommandPayload::into_command)
}
