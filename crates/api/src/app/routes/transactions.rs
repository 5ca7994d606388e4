use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use ezbooks_accounting::{ProposalEdits, ReceiptFile, TransactionChanges};
use ezbooks_ai::Overrides;
use ezbooks_auth::Permission;
use ezbooks_infra::{ManualProposal, NewTransaction};

use crate::app::routes::common::{self, json, ApiResult};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_transactions).post(record_transaction))
        .route("/bank-sync/removed", post(bank_removed))
        .route(
            "/:id",
            get(get_transaction)
                .patch(correct_transaction)
                .delete(delete_transaction),
        )
        .route("/:id/receipts", post(attach_receipt))
        .route("/:id/suggest", post(suggest))
        .route("/:id/alternatives", get(alternatives))
        .route("/:id/duplicates", get(duplicates))
        .route("/:id/proposals", get(list_proposals).post(propose_entry))
        .route("/:id/proposals/:pid/approve", post(approve_entry))
        .route("/:id/proposals/:pid/reject", post(reject_entry))
}

pub async fn list_transactions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::FINANCIALS_VIEW)?;
    let items = services.read_models().transactions.list(tenant.tenant_id());
    json(StatusCode::OK, dto::items(items))
}

/// Transaction with its proposals and, once approved, its posted entry.
pub async fn get_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::FINANCIALS_VIEW)?;
    let transaction_id = common::transaction_id(&id)?;
    let read = services.read_models();
    let Some(view) = read.transactions.get(tenant.tenant_id(), transaction_id) else {
        return Err(errors::not_found("transaction"));
    };
    json(
        StatusCode::OK,
        serde_json::json!({
            "transaction": view,
            "proposals": read.proposals.for_transaction(tenant.tenant_id(), transaction_id),
            "entry": read.journal.for_transaction(tenant.tenant_id(), transaction_id),
        }),
    )
}

pub async fn record_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<NewTransaction>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::TRANSACTIONS_EDIT)?;
    let id = services
        .bookkeeping
        .record_transaction(tenant.tenant_id(), body)
        .map_err(errors::bookkeeping_error_to_response)?;
    json(StatusCode::CREATED, serde_json::json!({ "id": id }))
}

pub async fn correct_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<TransactionChanges>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::TRANSACTIONS_EDIT)?;
    let transaction_id = common::transaction_id(&id)?;
    let resuggest = services
        .bookkeeping
        .correct_transaction(tenant.tenant_id(), transaction_id, body)
        .map_err(errors::bookkeeping_error_to_response)?;
    json(
        StatusCode::OK,
        serde_json::json!({ "id": transaction_id, "resuggest": resuggest }),
    )
}

pub async fn delete_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::TRANSACTIONS_EDIT)?;
    let transaction_id = common::transaction_id(&id)?;
    let discarded = services
        .bookkeeping
        .delete_transaction(tenant.tenant_id(), transaction_id)
        .map_err(errors::bookkeeping_error_to_response)?;
    json(
        StatusCode::OK,
        serde_json::json!({ "id": transaction_id, "discarded_proposals": discarded }),
    )
}

/// Bank feed reported these external ids as gone.
pub async fn bank_removed(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::BankRemovedRequest>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::TRANSACTIONS_EDIT)?;
    let removed = services
        .bookkeeping
        .remove_bank_transactions(tenant.tenant_id(), &body.external_ids)
        .map_err(errors::bookkeeping_error_to_response)?;
    json(StatusCode::OK, serde_json::json!({ "removed": removed }))
}

pub async fn attach_receipt(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<ReceiptFile>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::TRANSACTIONS_EDIT)?;
    let transaction_id = common::transaction_id(&id)?;
    let receipt_id = services
        .bookkeeping
        .capture_receipt(tenant.tenant_id(), body, Some(transaction_id))
        .map_err(errors::bookkeeping_error_to_response)?;
    json(StatusCode::CREATED, serde_json::json!({ "id": receipt_id }))
}

/// Run the suggestion engine now and return the new pending proposal.
pub async fn suggest(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::SuggestRequest>>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::TRANSACTIONS_EDIT)?;
    let transaction_id = common::transaction_id(&id)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let overrides = Overrides {
        debit_account_id: body.debit_account_id,
        credit_account_id: body.credit_account_id,
    };

    match services
        .bookkeeping
        .suggest_now(tenant.tenant_id(), transaction_id, overrides)
        .map_err(errors::bookkeeping_error_to_response)?
    {
        Some(proposal) => json(StatusCode::CREATED, proposal),
        None => Err(errors::json_error(
            StatusCode::CONFLICT,
            "conflict",
            "transaction is removed or already approved",
        )),
    }
}

pub async fn alternatives(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::FINANCIALS_VIEW)?;
    let transaction_id = common::transaction_id(&id)?;
    let items = services
        .bookkeeping
        .alternatives(tenant.tenant_id(), transaction_id)
        .map_err(errors::bookkeeping_error_to_response)?;
    json(StatusCode::OK, dto::items(items))
}

pub async fn duplicates(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::FINANCIALS_VIEW)?;
    let transaction_id = common::transaction_id(&id)?;
    let duplicate = services
        .bookkeeping
        .find_duplicate(tenant.tenant_id(), transaction_id)
        .map_err(errors::bookkeeping_error_to_response)?;
    json(StatusCode::OK, serde_json::json!({ "duplicate": duplicate }))
}

pub async fn list_proposals(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::FINANCIALS_VIEW)?;
    let transaction_id = common::transaction_id(&id)?;
    let items = services
        .read_models()
        .proposals
        .for_transaction(tenant.tenant_id(), transaction_id);
    json(StatusCode::OK, dto::items(items))
}

pub async fn propose_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<ManualProposal>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::TRANSACTIONS_EDIT)?;
    let transaction_id = common::transaction_id(&id)?;
    let proposal = services
        .bookkeeping
        .propose_entry(tenant.tenant_id(), transaction_id, body)
        .map_err(errors::bookkeeping_error_to_response)?;
    json(StatusCode::CREATED, proposal)
}

/// Approve a pending proposal, optionally with edits. Answers with the
/// posted entry; a second approval (or one racing it) gets 409.
pub async fn approve_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, pid)): Path<(String, String)>,
    body: Option<Json<ProposalEdits>>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::ENTRIES_APPROVE)?;
    let transaction_id = common::transaction_id(&id)?;
    let proposal_id = common::proposal_id(&pid)?;
    let edits = body.map(|Json(b)| b).unwrap_or_default();

    let entry = services
        .bookkeeping
        .approve_entry(
            tenant.tenant_id(),
            transaction_id,
            proposal_id,
            edits,
            principal.principal_id(),
        )
        .map_err(errors::bookkeeping_error_to_response)?;
    json(StatusCode::OK, entry)
}

pub async fn reject_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, pid)): Path<(String, String)>,
) -> ApiResult {
    authz::require(&tenant, &principal, &Permission::ENTRIES_APPROVE)?;
    let transaction_id = common::transaction_id(&id)?;
    let proposal_id = common::proposal_id(&pid)?;
    services
        .bookkeeping
        .reject_entry(tenant.tenant_id(), transaction_id, proposal_id, principal.principal_id())
        .map_err(errors::bookkeeping_error_to_response)?;
    json(
        StatusCode::OK,
        serde_json::json!({ "id": proposal_id, "status": "rejected" }),
    )
}
