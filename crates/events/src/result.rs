//! Outcome of a dispatch attempt.

use serde::Serialize;

/// Transport that carried (or failed to carry) a payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Live,
    DurableQueue,
}

impl core::fmt::Display for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Channel::Live => f.write_str("LIVE"),
            Channel::DurableQueue => f.write_str("DURABLE_QUEUE"),
        }
    }
}

/// Failure description that is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ErrorDetail(String);

impl ErrorDetail {
    pub fn new(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        if detail.trim().is_empty() {
            Self("unspecified transport failure".to_string())
        } else {
            Self(detail)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of `Dispatcher::send`.
///
/// Exactly one transport carries a successful payload. A failure is only
/// reported once the durable backstop itself has failed; the caller decides
/// whether that is fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MessagingResult {
    Delivered { channel: Channel },
    Failed { channel: Channel, error: ErrorDetail },
}

impl MessagingResult {
    pub fn delivered(channel: Channel) -> Self {
        Self::Delivered { channel }
    }

    pub fn failed(channel: Channel, error: impl Into<String>) -> Self {
        Self::Failed {
            channel,
            error: ErrorDetail::new(error),
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            Self::Delivered { channel } | Self::Failed { channel, .. } => *channel,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    pub fn error_detail(&self) -> Option<&str> {
        match self {
            Self::Delivered { .. } => None,
            Self::Failed { error, .. } => Some(error.as_str()),
        }
    }
}
