use std::collections::HashSet;

use commandrelay_core::TargetId;
use thiserror::Error;

use crate::{Permission, Principal, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),

    #[error("forbidden: '{caller}' may not acknowledge commands for '{target}'")]
    NotOwner { caller: String, target: String },
}

/// Check a single permission.
///
/// - No IO
/// - No panics
/// - Wildcard `"*"` grants everything
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    let granted = principal
        .permissions()
        .any(|p| p.is_wildcard() || p == required);

    if granted {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Decides whether a caller may acknowledge commands addressed to `target`.
///
/// Acknowledgment consults this once per distinct target before touching the
/// store, so a rejection never leaves a partially applied batch.
pub trait AcknowledgmentAuthorizer: Send + Sync {
    fn authorize_acknowledgment(&self, caller: &Principal, target: &TargetId) -> Result<(), AuthzError>;
}

impl<T> AcknowledgmentAuthorizer for std::sync::Arc<T>
where
    T: AcknowledgmentAuthorizer + ?Sized,
{
    fn authorize_acknowledgment(&self, caller: &Principal, target: &TargetId) -> Result<(), AuthzError> {
        (**self).authorize_acknowledgment(caller, target)
    }
}

/// Owner, elevated role, or `commands.acknowledge.any`.
#[derive(Debug, Clone)]
pub struct RoleBasedAuthorizer {
    elevated_roles: HashSet<Role>,
}

impl RoleBasedAuthorizer {
    pub fn new(elevated_roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            elevated_roles: elevated_roles.into_iter().collect(),
        }
    }

    pub fn is_elevated(&self, caller: &Principal) -> bool {
        caller.roles().iter().any(|r| self.elevated_roles.contains(r))
            || authorize(caller, &Permission::COMMANDS_ACKNOWLEDGE_ANY).is_ok()
    }
}

impl Default for RoleBasedAuthorizer {
    fn default() -> Self {
        Self::new([Role::SUPERVISOR, Role::ADMIN])
    }
}

impl AcknowledgmentAuthorizer for RoleBasedAuthorizer {
    fn authorize_acknowledgment(&self, caller: &Principal, target: &TargetId) -> Result<(), AuthzError> {
        if caller.owns(target) || self.is_elevated(caller) {
            return Ok(());
        }

        tracing::debug!(caller = %caller.identity(), %target, "acknowledgment denied");
        Err(AuthzError::NotOwner {
            caller: caller.identity().to_string(),
            target: target.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(email: &str, roles: &[&str]) -> Principal {
        Principal::new(
            TargetId::parse(email).unwrap(),
            roles.iter().filter_map(|r| Role::parse(r)).collect(),
        )
    }

    fn target(email: &str) -> TargetId {
        TargetId::parse(email).unwrap()
    }

    #[test]
    fn supervisor_can_issue_but_employee_cannot() {
        let sup = principal("boss@x.com", &["supervisor"]);
        let emp = principal("pso@x.com", &["employee"]);

        assert!(authorize(&sup, &Permission::COMMANDS_ISSUE).is_ok());
        assert_eq!(
            authorize(&emp, &Permission::COMMANDS_ISSUE),
            Err(AuthzError::Forbidden("commands.issue".to_string()))
        );
    }

    #[test]
    fn admin_wildcard_grants_any_permission() {
        let admin = principal("root@x.com", &["admin"]);
        assert!(authorize(&admin, &Permission::new("anything.at.all")).is_ok());
    }

    #[test]
    fn owner_may_acknowledge_own_commands_only() {
        let authz = RoleBasedAuthorizer::default();
        let emp = principal("pso@x.com", &["employee"]);

        assert!(authz.authorize_acknowledgment(&emp, &target("PSO@x.com")).is_ok());
        assert!(matches!(
            authz.authorize_acknowledgment(&emp, &target("other@x.com")),
            Err(AuthzError::NotOwner { .. })
        ));
    }

    #[test]
    fn elevated_role_may_acknowledge_for_anyone() {
        let authz = RoleBasedAuthorizer::new([Role::new("lead")]);
        let lead = principal("lead@x.com", &["lead"]);
        let sup = principal("boss@x.com", &["supervisor"]);

        assert!(authz.authorize_acknowledgment(&lead, &target("pso@x.com")).is_ok());
        // Supervisors carry commands.acknowledge.any regardless of the configured set.
        assert!(authz.authorize_acknowledgment(&sup, &target("pso@x.com")).is_ok());
    }

    #[test]
    fn observer_is_not_elevated() {
        let authz = RoleBasedAuthorizer::default();
        let obs = principal("watch@x.com", &["observer"]);
        assert!(!authz.is_elevated(&obs));
        assert!(authz.authorize_acknowledgment(&obs, &target("pso@x.com")).is_err());
    }
}
