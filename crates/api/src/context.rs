use commandrelay_auth::{Principal, Role};
use commandrelay_core::TargetId;

/// Principal context for a request (gateway-supplied identity + roles).
///
/// Inserted by the principal middleware; present on every route except `/health`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
}

impl PrincipalContext {
    pub fn new(identity: TargetId, roles: Vec<Role>) -> Self {
        Self {
            principal: Principal::new(identity, roles),
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn identity(&self) -> &TargetId {
        self.principal.identity()
    }

    pub fn roles(&self) -> &[Role] {
        self.principal.roles()
    }
}
