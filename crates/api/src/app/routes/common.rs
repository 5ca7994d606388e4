use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use ezbooks_accounting::{AccountId, ReceiptId, TransactionId};
use ezbooks_core::{AggregateId, EntryId, ProposalId};

use crate::app::errors;

/// Handlers answer with a response either way; `Err` short-circuits.
pub type ApiResult = Result<Response, Response>;

pub fn json<T: Serialize>(status: StatusCode, body: T) -> ApiResult {
    Ok((status, Json(body)).into_response())
}

pub fn account_id(raw: &str) -> Result<AccountId, Response> {
    errors::parse_uuid(raw, "account id").map(|u| AccountId::new(AggregateId::from_uuid(u)))
}

pub fn transaction_id(raw: &str) -> Result<TransactionId, Response> {
    errors::parse_uuid(raw, "transaction id").map(|u| TransactionId::new(AggregateId::from_uuid(u)))
}

pub fn receipt_id(raw: &str) -> Result<ReceiptId, Response> {
    errors::parse_uuid(raw, "receipt id").map(|u| ReceiptId::new(AggregateId::from_uuid(u)))
}

pub fn proposal_id(raw: &str) -> Result<ProposalId, Response> {
    errors::parse_uuid(raw, "proposal id").map(ProposalId::from_uuid)
}

pub fn entry_id(raw: &str) -> Result<EntryId, Response> {
    errors::parse_uuid(raw, "entry id").map(EntryId::from_uuid)
}
