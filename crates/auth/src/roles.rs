use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::permissions::Permission;

/// Role identifier used for RBAC.
///
/// Roles are opaque lower-case strings supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));
    pub const SUPERVISOR: Role = Role(Cow::Borrowed("supervisor"));
    pub const OBSERVER: Role = Role(Cow::Borrowed("observer"));
    pub const EMPLOYEE: Role = Role(Cow::Borrowed("employee"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Parse a role name as it arrives from a header or config list.
    pub fn parse(raw: &str) -> Option<Self> {
        let name = raw.trim().to_ascii_lowercase();
        if name.is_empty() { None } else { Some(Self(Cow::Owned(name))) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Static role → permission policy.
pub fn permissions_for_role(role: &Role) -> Vec<Permission> {
    match role.as_str() {
        "admin" => vec![Permission::WILDCARD],
        "supervisor" => vec![
            Permission::COMMANDS_ISSUE,
            Permission::COMMANDS_READ_ANY,
            Permission::COMMANDS_ACKNOWLEDGE_ANY,
        ],
        "observer" => vec![Permission::COMMANDS_READ_ANY],
        _ => Vec::new(),
    }
}
