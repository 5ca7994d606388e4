use thiserror::Error;

use ezbooks_core::TenantId;

use crate::{Permission, PrincipalId, Role, TenantMembership};

/// A fully resolved principal for authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub active_tenant_id: TenantId,
    pub membership: TenantMembership,
}

impl Principal {
    /// Principal acting in `tenant_id` with role-derived permissions.
    pub fn in_tenant(principal_id: PrincipalId, tenant_id: TenantId, roles: Vec<Role>) -> Self {
        Self {
            principal_id,
            active_tenant_id: tenant_id,
            membership: TenantMembership::from_roles(tenant_id, roles),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Authorize a principal within its active tenant. Pure policy check.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_tenant_id != principal.membership.tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    let granted = principal
        .membership
        .permissions
        .iter()
        .any(|p| p.is_wildcard() || p == required);

    if granted {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_cannot_approve() {
        let p = Principal::in_tenant(PrincipalId::new(), TenantId::new(), vec![Role::VIEWER]);

        assert_eq!(authorize(&p, &Permission::FINANCIALS_VIEW), Ok(()));
        assert_eq!(
            authorize(&p, &Permission::ENTRIES_APPROVE),
            Err(AuthzError::Forbidden("entries.approve".to_string()))
        );
    }

    #[test]
    fn owner_wildcard_grants_everything() {
        let p = Principal::in_tenant(PrincipalId::new(), TenantId::new(), vec![Role::OWNER]);
        assert_eq!(authorize(&p, &Permission::ENTRIES_APPROVE), Ok(()));
        assert_eq!(authorize(&p, &Permission::new("anything.else")), Ok(()));
    }

    #[test]
    fn membership_for_other_tenant_is_rejected() {
        let mut p = Principal::in_tenant(PrincipalId::new(), TenantId::new(), vec![Role::OWNER]);
        p.active_tenant_id = TenantId::new();
        assert_eq!(
            authorize(&p, &Permission::FINANCIALS_VIEW),
            Err(AuthzError::TenantMismatch)
        );
    }
}
