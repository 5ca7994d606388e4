//! Deterministic double-entry suggestion engine.
//!
//! Account selection, in order of preference:
//!
//! * money in: debit the bank account, credit the income account matching the
//!   category (or any income account);
//! * money out: debit an expense account picked by industry preference,
//!   category, description keywords, merchant keywords, then any expense
//!   account; credit a credit-card liability if one exists, else the bank.
//!
//! Confidence is fixed per branch (0.85 income, 0.80 expense, 0.50 when the
//! only match is an "uncategorized" account, 0.60 for the generic fallback
//! and for alternatives).

use serde::{Deserialize, Serialize};

use ezbooks_core::{AggregateId, TenantId};

use crate::category::{CategoryGuess, infer_category, mentions_any};
use crate::job::AiJob;
use crate::error::AiError;
use crate::snapshot::{AccountClass, AccountSnapshot, BusinessContext, TransactionSnapshot};

const INCOME_CONFIDENCE: f64 = 0.85;
const EXPENSE_CONFIDENCE: f64 = 0.80;
const UNCATEGORIZED_CONFIDENCE: f64 = 0.50;
const FALLBACK_CONFIDENCE: f64 = 0.60;
const ALTERNATIVE_CONFIDENCE: f64 = 0.60;
const MAX_ALTERNATIVES: usize = 2;

/// A proposed debit/credit pair. `amount` is positive minor units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySuggestion {
    pub debit_account_id: AggregateId,
    pub credit_account_id: AggregateId,
    pub amount: i64,
    pub memo: Option<String>,
    pub confidence: f64,
    pub explanation: String,
}

/// Reviewer-chosen accounts that replace the engine's pick when they exist
/// in the chart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrides {
    pub debit_account_id: Option<AggregateId>,
    pub credit_account_id: Option<AggregateId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionInput {
    pub transaction: TransactionSnapshot,
    pub accounts: Vec<AccountSnapshot>,
    pub business: Option<BusinessContext>,
    #[serde(default)]
    pub overrides: Overrides,
}

/// Everything a suggestion job produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionOutcome {
    pub primary: EntrySuggestion,
    pub alternatives: Vec<EntrySuggestion>,
    /// Set when the transaction had no category and one was inferred.
    pub inferred_category: Option<CategoryGuess>,
}

/// Suggest an entry for one transaction.
pub fn suggest_entry(input: &SuggestionInput) -> Result<EntrySuggestion, AiError> {
    let txn = &input.transaction;
    let accounts = input.accounts.as_slice();

    if txn.amount == 0 {
        return Err(AiError::InvalidInput("transaction amount is zero".to_string()));
    }
    let amount = txn
        .amount
        .checked_abs()
        .ok_or_else(|| AiError::InvalidInput("transaction amount out of range".to_string()))?;
    let memo = Some(txn.description.clone());

    let bank = find_bank_account(accounts)
        .ok_or_else(|| AiError::InvalidInput("no bank account found for entry".to_string()))?;
    let credit_card = accounts
        .iter()
        .find(|a| a.class == AccountClass::Liability && a.name_contains("credit"));
    let by_id = |id: AggregateId| accounts.iter().find(|a| a.id == id);
    let overrides = input.overrides;

    if txn.amount > 0 {
        let income = find_by_category(accounts, AccountClass::Income, &txn.category)
            .or_else(|| first_of(accounts, AccountClass::Income))
            .ok_or_else(|| {
                AiError::InferenceFailed("no income account to credit".to_string())
            })?;

        let debit = overrides.debit_account_id.and_then(by_id).unwrap_or(bank);
        let credit = overrides.credit_account_id.and_then(by_id).unwrap_or(income);

        return finish(EntrySuggestion {
            debit_account_id: debit.id,
            credit_account_id: credit.id,
            amount,
            memo,
            confidence: INCOME_CONFIDENCE,
            explanation: format!("Income transaction: {} -> {}", credit.name, debit.name),
        });
    }

    let expense = pick_expense_account(input)
        .ok_or_else(|| AiError::InferenceFailed("no expense account to debit".to_string()))?;
    let debit = overrides.debit_account_id.and_then(by_id).unwrap_or(expense);

    let credit = match overrides.credit_account_id {
        Some(id) => by_id(id),
        None => Some(credit_card.unwrap_or(bank)),
    };

    let Some(credit) = credit else {
        // Unknown credit override: fall back to a plain bank-paid expense.
        return finish(EntrySuggestion {
            debit_account_id: expense.id,
            credit_account_id: bank.id,
            amount,
            memo,
            confidence: FALLBACK_CONFIDENCE,
            explanation: "Generic expense entry".to_string(),
        });
    };

    let paid_from = if credit_card.is_some() { "credit card" } else { "bank account" };
    let confidence = if expense.name_contains("uncategorized") {
        UNCATEGORIZED_CONFIDENCE
    } else {
        EXPENSE_CONFIDENCE
    };

    finish(EntrySuggestion {
        debit_account_id: debit.id,
        credit_account_id: credit.id,
        amount,
        memo,
        confidence,
        explanation: format!("Expense: {} paid from {} ({paid_from})", expense.name, credit.name),
    })
}

/// Up to two other plausible pairs for the same transaction.
pub fn alternatives(input: &SuggestionInput, primary: &EntrySuggestion) -> Vec<EntrySuggestion> {
    let accounts = input.accounts.as_slice();
    let Some(bank) = first_of(accounts, AccountClass::Asset) else {
        return Vec::new();
    };

    let (class, label) = if input.transaction.amount < 0 {
        (AccountClass::Expense, "expense")
    } else {
        (AccountClass::Income, "income")
    };

    accounts
        .iter()
        .filter(|a| a.class == class)
        .take(3)
        .filter(|a| match class {
            AccountClass::Expense => a.id != primary.debit_account_id,
            _ => a.id != primary.credit_account_id,
        })
        .map(|a| {
            let (debit, credit) = match class {
                AccountClass::Expense => (a.id, bank.id),
                _ => (bank.id, a.id),
            };
            EntrySuggestion {
                debit_account_id: debit,
                credit_account_id: credit,
                amount: primary.amount,
                memo: primary.memo.clone(),
                confidence: ALTERNATIVE_CONFIDENCE,
                explanation: format!("Alternative: {} {label}", a.name),
            }
        })
        .filter(|s| s.debit_account_id != s.credit_account_id)
        .take(MAX_ALTERNATIVES)
        .collect()
}

fn finish(suggestion: EntrySuggestion) -> Result<EntrySuggestion, AiError> {
    if suggestion.debit_account_id == suggestion.credit_account_id {
        return Err(AiError::InvalidInput(
            "debit and credit resolve to the same account".to_string(),
        ));
    }
    Ok(suggestion)
}

fn first_of(accounts: &[AccountSnapshot], class: AccountClass) -> Option<&AccountSnapshot> {
    accounts.iter().find(|a| a.class == class)
}

fn find_named<'a>(
    accounts: &'a [AccountSnapshot],
    class: AccountClass,
    needles: &[&str],
) -> Option<&'a AccountSnapshot> {
    accounts
        .iter()
        .find(|a| a.class == class && needles.iter().any(|n| a.name_contains(n)))
}

/// Checking, then savings, then any asset.
fn find_bank_account(accounts: &[AccountSnapshot]) -> Option<&AccountSnapshot> {
    find_named(accounts, AccountClass::Asset, &["checking"])
        .or_else(|| find_named(accounts, AccountClass::Asset, &["savings"]))
        .or_else(|| first_of(accounts, AccountClass::Asset))
}

const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("office supplies", &["office", "supplies", "expenses"]),
    (
        "meals & entertainment",
        &["meals", "food", "restaurant", "dining", "entertainment", "meals & entertainment"],
    ),
    ("meals", &["meals", "food", "restaurant", "dining", "entertainment"]),
    ("travel", &["travel", "transportation"]),
    ("software & subscriptions", &["software", "subscription", "saas"]),
    ("software", &["software", "subscription", "saas"]),
    ("utilities", &["utilities", "electric", "water"]),
    ("rent", &["rent", "lease"]),
];

/// Match the first category against account names; if nothing matches,
/// any account of `class`. `None` only when there are no categories or no
/// accounts of that class.
fn find_by_category<'a>(
    accounts: &'a [AccountSnapshot],
    class: AccountClass,
    categories: &[String],
) -> Option<&'a AccountSnapshot> {
    let first = categories.first()?.to_lowercase();

    let keywords: Vec<&str> = CATEGORY_KEYWORDS
        .iter()
        .find(|(key, _)| *key == first)
        .or_else(|| {
            CATEGORY_KEYWORDS
                .iter()
                .find(|(key, _)| first.contains(key) || key.contains(first.as_str()))
        })
        .map(|(_, kws)| kws.to_vec())
        .unwrap_or_else(|| vec![first.as_str()]);

    keywords
        .iter()
        .find_map(|k| find_named(accounts, class, &[*k]))
        .or_else(|| first_of(accounts, class))
}

const INDUSTRY_PREFERENCES: &[(&str, &[&str])] = &[
    ("creator", &["software", "equipment", "marketing", "subscription"]),
    ("tradesperson", &["vehicle", "tools", "materials", "equipment"]),
    ("wellness", &["equipment", "certification", "facility", "marketing"]),
    ("tutor", &["materials", "software", "education", "marketing"]),
    ("real_estate", &["marketing", "professional", "vehicle", "software"]),
    ("agency", &["software", "marketing", "professional", "subscription"]),
];

fn industry_preferred<'a>(
    accounts: &'a [AccountSnapshot],
    business_type: &str,
) -> Option<&'a AccountSnapshot> {
    let (_, keywords) = INDUSTRY_PREFERENCES
        .iter()
        .find(|(kind, _)| *kind == business_type)?;
    find_named(accounts, AccountClass::Expense, keywords)
}

const MEAL_WORDS: &[&str] = &[
    "dinner", "lunch", "breakfast", "meal", "food", "restaurant", "coffee", "starbucks", "dining",
    "cafe", "bar", "pizza", "eat", "drink", "beverage",
];
const MEAL_ACCOUNTS: &[&str] = &["meals", "food", "dining", "entertainment"];
const OFFICE_WORDS: &[&str] = &["office", "supplies", "stationery"];
const OFFICE_ACCOUNTS: &[&str] = &["office", "supplies"];
const TRAVEL_WORDS: &[&str] = &["travel", "hotel", "flight"];
const SOFTWARE_WORDS: &[&str] = &["software", "saas", "subscription"];
const SOFTWARE_ACCOUNTS: &[&str] = &["software", "subscription"];

fn expense_from_description<'a>(
    accounts: &'a [AccountSnapshot],
    description: &str,
) -> Option<&'a AccountSnapshot> {
    let d = description.to_lowercase();
    let needles: &[&str] = if mentions_any(&d, MEAL_WORDS) {
        MEAL_ACCOUNTS
    } else if mentions_any(&d, OFFICE_WORDS) {
        OFFICE_ACCOUNTS
    } else if mentions_any(&d, TRAVEL_WORDS) {
        &["travel"]
    } else if mentions_any(&d, SOFTWARE_WORDS) {
        SOFTWARE_ACCOUNTS
    } else {
        return None;
    };
    find_named(accounts, AccountClass::Expense, needles)
}

fn expense_from_merchant<'a>(
    accounts: &'a [AccountSnapshot],
    merchant: &str,
) -> Option<&'a AccountSnapshot> {
    let m = merchant.to_lowercase();
    let needles: &[&str] = if mentions_any(&m, &["office", "supplies"]) {
        OFFICE_ACCOUNTS
    } else if mentions_any(&m, TRAVEL_WORDS) {
        &["travel"]
    } else if mentions_any(&m, SOFTWARE_WORDS) {
        SOFTWARE_ACCOUNTS
    } else if mentions_any(&m, &["food", "restaurant", "coffee"]) {
        &["meals", "food", "dining"]
    } else {
        return None;
    };
    find_named(accounts, AccountClass::Expense, needles)
}

fn pick_expense_account(input: &SuggestionInput) -> Option<&AccountSnapshot> {
    let txn = &input.transaction;
    let accounts = input.accounts.as_slice();

    let industry = || {
        if !txn.is_business {
            return None;
        }
        let business_type = input.business.as_ref()?.business_type.as_deref()?;
        industry_preferred(accounts, business_type)
    };

    industry()
        .or_else(|| find_by_category(accounts, AccountClass::Expense, &txn.category))
        .or_else(|| expense_from_description(accounts, &txn.description))
        .or_else(|| {
            txn.merchant
                .as_deref()
                .and_then(|m| expense_from_merchant(accounts, m))
        })
        .or_else(|| {
            accounts.iter().find(|a| {
                a.class == AccountClass::Expense
                    && !["uncategorized", "miscellaneous", "other"]
                        .iter()
                        .any(|n| a.name_contains(n))
            })
        })
        .or_else(|| first_of(accounts, AccountClass::Expense))
}

/// Suggestion job for one transaction.
///
/// When the transaction has no category, one is inferred from its text
/// before accounts are chosen.
#[derive(Debug, Clone)]
pub struct EntrySuggestionJob {
    tenant_id: TenantId,
    input: SuggestionInput,
}

impl EntrySuggestionJob {
    pub fn new(tenant_id: TenantId, input: SuggestionInput) -> Self {
        Self { tenant_id, input }
    }

    pub fn input(&self) -> &SuggestionInput {
        &self.input
    }
}

impl AiJob for EntrySuggestionJob {
    type Output = SuggestionOutcome;

    fn name(&self) -> &'static str {
        "entry_suggestion"
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    fn run(&self) -> Result<SuggestionOutcome, AiError> {
        let mut input = self.input.clone();
        let mut inferred_category = None;

        if input.transaction.category.is_empty() {
            let guess = infer_category(
                &input.transaction.description,
                input.transaction.merchant.as_deref(),
                input.transaction.is_business,
            );
            input.transaction.category = vec![guess.category.clone()];
            inferred_category = Some(guess);
        }

        let primary = suggest_entry(&input)?;
        let alternatives = alternatives(&input, &primary);

        Ok(SuggestionOutcome {
            primary,
            alternatives,
            inferred_category,
        })
    }
}
