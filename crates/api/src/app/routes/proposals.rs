use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    routing::get,
    Router,
};

use ezbooks_auth::Permission;

use crate::app::dto;
use crate::app::routes::common::{json, ApiResult};
use crate::app::services::AppServices;
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new().route("/", get(list_proposals))
}

/// Review queue across all transactions, e.g. `?status=pending`.
pub async fn list_proposals(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::ProposalsQuery>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::FINANCIALS_VIEW)?;
    let items = services
        .read_models()
        .proposals
        .list(tenant.tenant_id(), query.status);
    json(StatusCode::OK, dto::items(items))
}
