//! Live-channel routing keys.

use commandrelay_core::TargetId;

/// Default prefix of per-target live channels (`commands:<target>`).
pub const DEFAULT_LIVE_PREFIX: &str = "commands";

/// Routing key of one target's live channel.
///
/// Derived only from the normalized `TargetId`, so differently-cased or
/// padded spellings of the same identity always land on the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn for_target(prefix: &str, target: &TargetId) -> Self {
        Self(format!("{prefix}:{target}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
