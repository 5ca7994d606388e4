//! API-side authorization guard.
//!
//! Checks run at the handler boundary, before anything is dispatched, so the
//! domain and infra layers stay auth-agnostic.

use axum::http::StatusCode;
use axum::response::Response;

use ezbooks_auth::{AuthzError, Permission, Principal, authorize};

use crate::app::errors;
use crate::context::{PrincipalContext, TenantContext};

/// Check that the caller holds `required` in the request's tenant.
pub fn check(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    required: &Permission,
) -> Result<(), AuthzError> {
    let principal = Principal::in_tenant(
        principal.principal_id(),
        tenant.tenant_id(),
        principal.roles().to_vec(),
    );
    authorize(&principal, required)
}

/// [`check`], with the failure already mapped to a 403 response.
pub fn require(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    required: &Permission,
) -> Result<(), Response> {
    check(tenant, principal, required).map_err(|e| {
        tracing::debug!(
            tenant_id = %tenant.tenant_id(),
            principal_id = %principal.principal_id(),
            permission = %required,
            "authorization denied"
        );
        errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezbooks_auth::{PrincipalId, Role};
    use ezbooks_core::TenantId;

    #[test]
    fn bookkeeper_may_approve_and_viewer_may_only_view() {
        let tenant = TenantContext::new(TenantId::new());
        let bookkeeper = PrincipalContext::new(PrincipalId::new(), vec![Role::BOOKKEEPER]);
        let viewer = PrincipalContext::new(PrincipalId::new(), vec![Role::VIEWER]);

        assert!(check(&tenant, &bookkeeper, &Permission::ENTRIES_APPROVE).is_ok());
        assert!(check(&tenant, &viewer, &Permission::FINANCIALS_VIEW).is_ok());
        assert_eq!(
            check(&tenant, &viewer, &Permission::TRANSACTIONS_EDIT),
            Err(AuthzError::Forbidden("transactions.edit".into()))
        );
    }

    #[test]
    fn unknown_roles_grant_nothing() {
        let tenant = TenantContext::new(TenantId::new());
        let intern = PrincipalContext::new(PrincipalId::new(), vec![Role::new("intern")]);
        assert!(check(&tenant, &intern, &Permission::FINANCIALS_VIEW).is_err());
    }
}
