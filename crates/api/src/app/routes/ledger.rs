use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::get,
    Json, Router,
};

use ezbooks_auth::Permission;
use ezbooks_infra::{NewManualEntry, Reports};

use crate::app::routes::common::{self, json, ApiResult};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/entries", get(list_entries).post(post_manual_entry))
        .route("/entries/:id", get(get_entry))
        .route("/balances", get(list_balances))
        .route("/trial-balance", get(trial_balance))
        .route("/profit-and-loss", get(profit_and_loss))
        .route("/balance-sheet", get(balance_sheet))
        .route("/accounts/:id/general-ledger", get(general_ledger))
}

pub async fn list_entries(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::FINANCIALS_VIEW)?;
    let items = services.read_models().journal.list(tenant.tenant_id());
    json(StatusCode::OK, dto::items(items))
}

pub async fn get_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::FINANCIALS_VIEW)?;
    let entry_id = common::entry_id(&id)?;
    match services.read_models().journal.get(tenant.tenant_id(), entry_id) {
        Some(entry) => json(StatusCode::OK, entry),
        None => Err(errors::not_found("entry")),
    }
}

/// Manual or adjusting entry straight into the general ledger.
pub async fn post_manual_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<NewManualEntry>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::ENTRIES_APPROVE)?;
    let entry = services
        .bookkeeping
        .post_manual_entry(tenant.tenant_id(), body, principal.principal_id())
        .map_err(errors::bookkeeping_error_to_response)?;
    json(StatusCode::CREATED, entry)
}

pub async fn list_balances(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::FINANCIALS_VIEW)?;
    let items = services.read_models().balances.list(tenant.tenant_id());
    json(StatusCode::OK, dto::items(items))
}

pub async fn trial_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::AsOfQuery>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::FINANCIALS_VIEW)?;
    let report = Reports::new(services.read_models(), tenant.tenant_id()).trial_balance(query.as_of());
    json(StatusCode::OK, report)
}

pub async fn profit_and_loss(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::PeriodQuery>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::FINANCIALS_VIEW)?;
    let (from, to) = period(&query)?;
    let report = Reports::new(services.read_models(), tenant.tenant_id()).profit_and_loss(from, to, query.business);
    json(StatusCode::OK, report)
}

pub async fn balance_sheet(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::AsOfQuery>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::FINANCIALS_VIEW)?;
    let report = Reports::new(services.read_models(), tenant.tenant_id()).balance_sheet(query.as_of());
    json(StatusCode::OK, report)
}

pub async fn general_ledger(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Query(query): Query<dto::PeriodQuery>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::FINANCIALS_VIEW)?;
    let account_id = common::account_id(&id)?;
    let (from, to) = period(&query)?;
    match Reports::new(services.read_models(), tenant.tenant_id()).general_ledger(account_id, from, to) {
        Some(report) => json(StatusCode::OK, report),
        None => Err(errors::not_found("account")),
    }
}

fn period(query: &dto::PeriodQuery) -> Result<(chrono::NaiveDate, chrono::NaiveDate), axum::response::Response> {
    query
        .range()
        .map_err(|msg| errors::json_error(StatusCode::BAD_REQUEST, "invalid_period", msg))
}
