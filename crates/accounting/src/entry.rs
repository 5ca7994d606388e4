//! Posted ledger records: a final entry and its two balanced lines.
//!
//! A [`FinalEntry`] is immutable once built. Every constructor and every
//! aggregate that emits one calls [`FinalEntry::validate`], so the balance
//! invariant is checked explicitly rather than assumed from construction.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use ezbooks_core::{Currency, DomainError, DomainResult, EntryId, ProposalId, UserId};

use crate::ids::{AccountId, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySide {
    Debit,
    Credit,
}

impl EntrySide {
    pub fn opposite(self) -> Self {
        match self {
            EntrySide::Debit => EntrySide::Credit,
            EntrySide::Credit => EntrySide::Debit,
        }
    }
}

/// Where a posted entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    Bank,
    Manual,
    Ai,
    Adjustment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryLine {
    pub account_id: AccountId,
    pub side: EntrySide,
    /// Positive amount in minor units.
    pub amount: i64,
    pub currency: Currency,
}

/// Descriptive fields of a posted entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryHeader {
    pub entry_id: EntryId,
    pub date: NaiveDate,
    pub memo: Option<String>,
    pub source: EntrySource,
    pub transaction_id: Option<TransactionId>,
    pub proposal_id: Option<ProposalId>,
    pub is_business: bool,
    pub approved_by: Option<UserId>,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalEntry {
    #[serde(flatten)]
    pub header: EntryHeader,
    pub lines: Vec<EntryLine>,
}

impl FinalEntry {
    /// Build the canonical two-line entry: `debit` is debited and `credit`
    /// is credited with the same `amount`.
    pub fn balanced_pair(
        header: EntryHeader,
        debit: AccountId,
        credit: AccountId,
        amount: i64,
        currency: Currency,
    ) -> DomainResult<Self> {
        let entry = Self {
            header,
            lines: vec![
                EntryLine {
                    account_id: debit,
                    side: EntrySide::Debit,
                    amount,
                    currency: currency.clone(),
                },
                EntryLine {
                    account_id: credit,
                    side: EntrySide::Credit,
                    amount,
                    currency,
                },
            ],
        };
        entry.validate()?;
        Ok(entry)
    }

    pub fn id(&self) -> EntryId {
        self.header.entry_id
    }

    pub fn total(&self, side: EntrySide) -> i128 {
        self.lines
            .iter()
            .filter(|l| l.side == side)
            .map(|l| l.amount as i128)
            .sum()
    }

    pub fn line(&self, side: EntrySide) -> Option<&EntryLine> {
        self.lines.iter().find(|l| l.side == side)
    }

    /// Exactly two lines, one per side, same positive amount and currency,
    /// against two different accounts.
    pub fn validate(&self) -> DomainResult<()> {
        if self.lines.len() != 2 {
            return Err(DomainError::invariant(format!(
                "final entry must have exactly two lines, got {}",
                self.lines.len()
            )));
        }

        let (a, b) = (&self.lines[0], &self.lines[1]);

        if a.side == b.side {
            return Err(DomainError::invariant("entry lines must be on opposite sides"));
        }
        if a.amount <= 0 || b.amount <= 0 {
            return Err(DomainError::validation("amount must be positive"));
        }
        if a.currency != b.currency {
            return Err(DomainError::invariant("entry lines must share a currency"));
        }
        if a.account_id == b.account_id {
            return Err(DomainError::validation(
                "debit and credit accounts must differ",
            ));
        }
        if self.total(EntrySide::Debit) != self.total(EntrySide::Credit) {
            return Err(DomainError::invariant("debits must equal credits"));
        }

        Ok(())
    }
}
