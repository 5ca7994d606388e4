//! Read-only inputs for the suggestion engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use ezbooks_core::AggregateId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountClass {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub id: AggregateId,
    pub name: String,
    pub class: AccountClass,
}

impl AccountSnapshot {
    /// Case-insensitive substring match on the account name.
    pub fn name_contains(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSnapshot {
    pub id: AggregateId,
    /// Signed minor units; negative is money out.
    pub amount: i64,
    pub date: NaiveDate,
    pub description: String,
    pub merchant: Option<String>,
    pub category: Vec<String>,
    pub is_business: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountingMethod {
    #[default]
    Cash,
    Accrual,
}

/// Tenant profile fields that steer account selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessContext {
    /// e.g. `creator`, `tradesperson`, `agency`.
    pub business_type: Option<String>,
    /// e.g. `llc`, `sole_proprietor`.
    pub entity_type: Option<String>,
    #[serde(default)]
    pub accounting_method: AccountingMethod,
}
