use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque strings (e.g. "commands.issue"). The wildcard `"*"`
/// grants everything.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));
    /// Submit START/STOP commands for any target.
    pub const COMMANDS_ISSUE: Permission = Permission(Cow::Borrowed("commands.issue"));
    /// Read another target's pending commands.
    pub const COMMANDS_READ_ANY: Permission = Permission(Cow::Borrowed("commands.read.any"));
    /// Acknowledge pending commands owned by another target.
    pub const COMMANDS_ACKNOWLEDGE_ANY: Permission =
        Permission(Cow::Borrowed("commands.acknowledge.any"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
