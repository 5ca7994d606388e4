use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use ezbooks_accounting::OcrFields;
use ezbooks_auth::Permission;

use crate::app::routes::common::{self, json, ApiResult};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_receipts).post(capture_receipt))
        .route("/:id", get(get_receipt))
        .route("/:id/ocr", post(record_ocr))
        .route("/:id/link", post(link_receipt))
}

pub async fn list_receipts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::FINANCIALS_VIEW)?;
    let items = services.read_models().receipts.list(tenant.tenant_id());
    json(StatusCode::OK, dto::items(items))
}

pub async fn get_receipt(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::FINANCIALS_VIEW)?;
    let receipt_id = common::receipt_id(&id)?;
    match services.read_models().receipts.get(tenant.tenant_id(), receipt_id) {
        Some(view) => json(StatusCode::OK, view),
        None => Err(errors::not_found("receipt")),
    }
}

/// Register an already-uploaded file, optionally attached to a transaction.
pub async fn capture_receipt(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CaptureReceiptRequest>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::TRANSACTIONS_EDIT)?;
    let id = services
        .bookkeeping
        .capture_receipt(tenant.tenant_id(), body.file, body.transaction_id)
        .map_err(errors::bookkeeping_error_to_response)?;
    json(StatusCode::CREATED, serde_json::json!({ "id": id }))
}

pub async fn record_ocr(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<OcrFields>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::TRANSACTIONS_EDIT)?;
    let receipt_id = common::receipt_id(&id)?;
    services
        .bookkeeping
        .record_ocr(tenant.tenant_id(), receipt_id, body)
        .map_err(errors::bookkeeping_error_to_response)?;
    json(StatusCode::OK, serde_json::json!({ "id": receipt_id }))
}

pub async fn link_receipt(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::LinkReceiptRequest>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::TRANSACTIONS_EDIT)?;
    let receipt_id = common::receipt_id(&id)?;
    services
        .bookkeeping
        .link_receipt(tenant.tenant_id(), receipt_id, body.transaction_id)
        .map_err(errors::bookkeeping_error_to_response)?;
    json(
        StatusCode::OK,
        serde_json::json!({ "id": receipt_id, "transaction_id": body.transaction_id }),
    )
}
