use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use ezbooks_auth::Permission;
use ezbooks_infra::NewAccount;

use crate::app::routes::common::{self, json, ApiResult};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_accounts).post(open_account))
        .route("/:id", get(get_account))
        .route("/:id/rename", post(rename_account))
        .route("/:id/link", post(link_account))
        .route("/:id/sync", post(sync_balance))
        .route("/:id/archive", post(archive_account))
}

pub async fn list_accounts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::FINANCIALS_VIEW)?;
    let items = services.read_models().accounts.list(tenant.tenant_id());
    json(StatusCode::OK, dto::items(items))
}

pub async fn get_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::FINANCIALS_VIEW)?;
    let account_id = common::account_id(&id)?;
    let read = services.read_models();
    let Some(view) = read.accounts.get(tenant.tenant_id(), account_id) else {
        return Err(errors::not_found("account"));
    };
    let balance = read.balances.get(tenant.tenant_id(), account_id);
    json(
        StatusCode::OK,
        serde_json::json!({ "account": view, "ledger_balance": balance }),
    )
}

pub async fn open_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<NewAccount>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::TRANSACTIONS_EDIT)?;
    let id = services
        .bookkeeping
        .open_account(tenant.tenant_id(), body)
        .map_err(errors::bookkeeping_error_to_response)?;
    json(StatusCode::CREATED, serde_json::json!({ "id": id }))
}

pub async fn rename_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RenameAccountRequest>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::TRANSACTIONS_EDIT)?;
    let account_id = common::account_id(&id)?;
    services
        .bookkeeping
        .rename_account(tenant.tenant_id(), account_id, body.name)
        .map_err(errors::bookkeeping_error_to_response)?;
    json(StatusCode::OK, serde_json::json!({ "id": account_id }))
}

pub async fn link_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::LinkAccountRequest>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::TRANSACTIONS_EDIT)?;
    let account_id = common::account_id(&id)?;
    services
        .bookkeeping
        .link_external_account(tenant.tenant_id(), account_id, body.external_account_id)
        .map_err(errors::bookkeeping_error_to_response)?;
    json(StatusCode::OK, serde_json::json!({ "id": account_id }))
}

pub async fn sync_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::SyncBalanceRequest>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::TRANSACTIONS_EDIT)?;
    let account_id = common::account_id(&id)?;
    services
        .bookkeeping
        .sync_balance(tenant.tenant_id(), account_id, body.balance)
        .map_err(errors::bookkeeping_error_to_response)?;
    json(StatusCode::OK, serde_json::json!({ "id": account_id, "balance": body.balance }))
}

pub async fn archive_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::TRANSACTIONS_EDIT)?;
    let account_id = common::account_id(&id)?;
    services
        .bookkeeping
        .archive_account(tenant.tenant_id(), account_id)
        .map_err(errors::bookkeeping_error_to_response)?;
    json(StatusCode::OK, serde_json::json!({ "id": account_id, "archived": true }))
}
