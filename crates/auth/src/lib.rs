//! `commandrelay-auth`: pure authorization boundary.
//!
//! Identity is established upstream; this crate only decides what an already
//! identified caller may do. No HTTP, no storage.

pub mod authorize;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{authorize, AcknowledgmentAuthorizer, AuthzError, RoleBasedAuthorizer};
pub use permissions::Permission;
pub use principal::Principal;
pub use roles::{permissions_for_role, Role};
