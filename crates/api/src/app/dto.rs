use chrono::{Days, NaiveDate, Utc};
use serde::Deserialize;

use ezbooks_accounting::{ProposalStatus, ReceiptFile, TransactionId};
use ezbooks_core::AggregateId;

// -------------------------
// Request DTOs
// -------------------------
//
// Creation bodies deserialize straight into the service inputs
// (`NewAccount`, `NewTransaction`, `ManualProposal`, `NewManualEntry`); the
// ones below cover the remaining routes.

#[derive(Debug, Deserialize)]
pub struct RenameAccountRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct LinkAccountRequest {
    pub external_account_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SyncBalanceRequest {
    /// Minor units, as reported by the bank.
    pub balance: i64,
}

/// Optional account overrides for a fresh suggestion.
#[derive(Debug, Default, Deserialize)]
pub struct SuggestRequest {
    #[serde(default)]
    pub debit_account_id: Option<AggregateId>,
    #[serde(default)]
    pub credit_account_id: Option<AggregateId>,
}

#[derive(Debug, Deserialize)]
pub struct BankRemovedRequest {
    pub external_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CaptureReceiptRequest {
    #[serde(flatten)]
    pub file: ReceiptFile,
    #[serde(default)]
    pub transaction_id: Option<TransactionId>,
}

#[derive(Debug, Deserialize)]
pub struct LinkReceiptRequest {
    pub transaction_id: TransactionId,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProposalsQuery {
    #[serde(default)]
    pub status: Option<ProposalStatus>,
}

/// `?as_of=YYYY-MM-DD`, today when omitted.
#[derive(Debug, Default, Deserialize)]
pub struct AsOfQuery {
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

impl AsOfQuery {
    pub fn as_of(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| Utc::now().date_naive())
    }
}

/// `?from=&to=`, inclusive. Defaults to the year ending today.
#[derive(Debug, Default, Deserialize)]
pub struct PeriodQuery {
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
    /// Profit and loss only: business or personal accounts; both when absent.
    #[serde(default)]
    pub business: Option<bool>,
}

impl PeriodQuery {
    pub fn range(&self) -> Result<(NaiveDate, NaiveDate), String> {
        let to = self.to.unwrap_or_else(|| Utc::now().date_naive());
        let from = match self.from {
            Some(from) => from,
            None => to.checked_sub_days(Days::new(365)).unwrap_or(NaiveDate::MIN),
        };
        if from > to {
            return Err(format!("period starts ({from}) after it ends ({to})"));
        }
        Ok((from, to))
    }
}

// -------------------------
// Response helpers
// -------------------------

/// `{"items": [...]}` list envelope.
pub fn items<T: serde::Serialize>(items: Vec<T>) -> serde_json::Value {
    serde_json::json!({ "items": items })
}
