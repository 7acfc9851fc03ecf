use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use commandrelay_core::{Entity, PendingCommand};

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /commands`. Field names follow the wire payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitCommandRequest {
    pub employee_email: String,
    pub command: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PendingQuery {
    pub target: Option<String>,
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

/// Submission outcome. The transport that carried the command is not exposed.
#[derive(Debug, Serialize)]
pub struct SubmitCommandResponse {
    pub status: &'static str,
}

impl SubmitCommandResponse {
    pub const ACCEPTED: Self = Self { status: "accepted" };
    pub const REJECTED: Self = Self { status: "rejected" };
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCommandView {
    pub id: String,
    pub employee_email: String,
    pub command: &'static str,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<&PendingCommand> for PendingCommandView {
    fn from(row: &PendingCommand) -> Self {
        // Rows hold the encoded wire payload; fall back to the raw text if it is not JSON.
        let payload = serde_json::from_str(row.payload())
            .unwrap_or_else(|_| serde_json::Value::String(row.payload().to_string()));

        Self {
            id: row.id().to_string(),
            employee_email: row.target().to_string(),
            command: row.kind().as_str(),
            payload,
            created_at: row.created_at(),
        }
    }
}
