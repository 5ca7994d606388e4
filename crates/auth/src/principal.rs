use serde::{Deserialize, Serialize};

use ezbooks_core::TenantId;

use crate::{Permission, Role, permissions_for_roles};

/// Authenticated identity. Tokens carry the user id as `sub`; decisions
/// record it as `approved_by` / `rejected_by`.
pub use ezbooks_core::UserId as PrincipalId;

/// A principal's grants within one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMembership {
    pub tenant_id: TenantId,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl TenantMembership {
    /// Membership whose permissions are exactly those the roles grant.
    pub fn from_roles(tenant_id: TenantId, roles: Vec<Role>) -> Self {
        let permissions = permissions_for_roles(&roles);
        Self {
            tenant_id,
            roles,
            permissions,
        }
    }
}
