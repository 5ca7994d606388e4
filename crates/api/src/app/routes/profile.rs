use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, Json};

use ezbooks_ai::BusinessContext;
use ezbooks_auth::Permission;

use crate::app::routes::common::{json, ApiResult};
use crate::app::services::AppServices;
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

/// Business profile used to tailor suggestions; defaults until one is set.
pub async fn get_profile(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::FINANCIALS_VIEW)?;
    let profile = services
        .bookkeeping
        .business_profile(tenant.tenant_id())
        .unwrap_or_default();
    json(StatusCode::OK, profile)
}

pub async fn put_profile(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<BusinessContext>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::TRANSACTIONS_EDIT)?;
    services.bookkeeping.set_business_profile(tenant.tenant_id(), body.clone());
    json(StatusCode::OK, body)
}
