use std::collections::BTreeSet;

use commandrelay_core::TargetId;

use crate::permissions::Permission;
use crate::roles::{permissions_for_role, Role};

/// An identified caller.
///
/// The identity is the caller's normalized email, the same value used as a
/// command target, so ownership checks are plain equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    identity: TargetId,
    roles: Vec<Role>,
    permissions: BTreeSet<Permission>,
}

impl Principal {
    /// Build a principal whose permissions come from the static role policy.
    pub fn new(identity: TargetId, roles: Vec<Role>) -> Self {
        let permissions = roles.iter().flat_map(permissions_for_role).collect();
        Self { identity, roles, permissions }
    }

    pub fn identity(&self) -> &TargetId {
        &self.identity
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }

    pub fn permissions(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.iter()
    }

    /// True when `target` is the caller's own identity.
    pub fn owns(&self, target: &TargetId) -> bool {
        &self.identity == target
    }
}
