//! Proposed entries: suggested debit/credit pairs awaiting a decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ezbooks_core::{Currency, DomainError, DomainResult, Entity, EntryId, ProposalId, UserId};

use crate::entry::EntrySource;
use crate::ids::{AccountId, TransactionId};

/// Proposal lifecycle. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ProposalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProposalStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
        }
    }
}

impl core::str::FromStr for ProposalStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProposalStatus::Pending),
            "approved" => Ok(ProposalStatus::Approved),
            "rejected" => Ok(ProposalStatus::Rejected),
            other => Err(DomainError::validation(format!("unknown proposal status: {other}"))),
        }
    }
}

/// Who or what produced the suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalSource {
    BankRules,
    UserRule,
    AiModel,
    Manual,
}

impl ProposalSource {
    /// Source recorded on the final entry once the proposal is approved.
    pub fn entry_source(self) -> EntrySource {
        match self {
            ProposalSource::BankRules => EntrySource::Bank,
            ProposalSource::AiModel => EntrySource::Ai,
            ProposalSource::UserRule | ProposalSource::Manual => EntrySource::Manual,
        }
    }
}

/// A ranked alternative debit/credit pair offered next to the main suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeEntry {
    pub debit_account_id: AccountId,
    pub credit_account_id: AccountId,
    pub explanation: String,
    pub confidence: f64,
}

/// The suggestion payload shared by "propose" and "revise".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub debit_account_id: AccountId,
    pub credit_account_id: AccountId,
    /// Positive amount in minor units.
    pub amount: i64,
    pub currency: Currency,
    /// In `0.0..=1.0`.
    pub confidence: f64,
    pub explanation: String,
    pub memo: Option<String>,
    pub is_business: bool,
    pub source: ProposalSource,
    pub alternatives: Vec<AlternativeEntry>,
}

impl Suggestion {
    pub fn validate(&self) -> DomainResult<()> {
        if self.amount <= 0 {
            return Err(DomainError::validation("amount must be positive"));
        }
        if self.debit_account_id == self.credit_account_id {
            return Err(DomainError::validation(
                "debit and credit accounts must differ",
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(DomainError::validation("confidence must be between 0 and 1"));
        }
        Ok(())
    }
}

/// Optional overrides a reviewer can apply while approving.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalEdits {
    pub debit_account_id: Option<AccountId>,
    pub credit_account_id: Option<AccountId>,
    pub memo: Option<String>,
    pub is_business: Option<bool>,
}

/// Entity owned by a [`crate::Transaction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedEntry {
    pub id: ProposalId,
    pub transaction_id: TransactionId,
    #[serde(flatten)]
    pub suggestion: Suggestion,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<UserId>,
    pub final_entry_id: Option<EntryId>,
}

impl Entity for ProposedEntry {
    type Id = ProposalId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl ProposedEntry {
    pub fn is_pending(&self) -> bool {
        self.status == ProposalStatus::Pending
    }

    /// Conditional-on-status guard for approve/reject/revise.
    pub fn ensure_pending(&self) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::conflict(format!(
                "proposal {} is already {}",
                self.id,
                self.status.as_str()
            )));
        }
        Ok(())
    }

    /// Debit account after applying `edits`.
    pub fn effective_debit(&self, edits: &ProposalEdits) -> AccountId {
        edits.debit_account_id.unwrap_or(self.suggestion.debit_account_id)
    }

    pub fn effective_credit(&self, edits: &ProposalEdits) -> AccountId {
        edits.credit_account_id.unwrap_or(self.suggestion.credit_account_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suggestion() -> Suggestion {
        Suggestion {
            debit_account_id: AccountId::generate(),
            credit_account_id: AccountId::generate(),
            amount: 4250,
            currency: Currency::usd(),
            confidence: 0.8,
            explanation: "Expense".into(),
            memo: None,
            is_business: true,
            source: ProposalSource::AiModel,
            alternatives: vec![],
        }
    }

    #[test]
    fn suggestion_rejects_bad_confidence_and_same_account() {
        assert!(suggestion().validate().is_ok());

        let mut s = suggestion();
        s.confidence = 1.2;
        assert!(s.validate().is_err());

        let mut s = suggestion();
        s.credit_account_id = s.debit_account_id;
        assert!(s.validate().is_err());

        let mut s = suggestion();
        s.amount = -1;
        assert!(s.validate().is_err());
    }

    #[test]
    fn terminal_statuses_refuse_transitions() {
        let now = Utc::now();
        let mut p = ProposedEntry {
            id: ProposalId::new(),
            transaction_id: TransactionId::generate(),
            suggestion: suggestion(),
            status: ProposalStatus::Pending,
            created_at: now,
            updated_at: now,
            decided_at: None,
            decided_by: None,
            final_entry_id: None,
        };
        assert!(p.ensure_pending().is_ok());

        for status in [ProposalStatus::Approved, ProposalStatus::Rejected] {
            p.status = status;
            assert!(matches!(p.ensure_pending(), Err(DomainError::Conflict(_))));
        }
    }

    #[test]
    fn edits_override_accounts() {
        let now = Utc::now();
        let p = ProposedEntry {
            id: ProposalId::new(),
            transaction_id: TransactionId::generate(),
            suggestion: suggestion(),
            status: ProposalStatus::Pending,
            created_at: now,
            updated_at: now,
            decided_at: None,
            decided_by: None,
            final_entry_id: None,
        };
        let other = AccountId::generate();
        let edits = ProposalEdits {
            debit_account_id: Some(other),
            ..ProposalEdits::default()
        };
        assert_eq!(p.effective_debit(&edits), other);
        assert_eq!(p.effective_credit(&edits), p.suggestion.credit_account_id);
    }

    #[test]
    fn source_maps_to_entry_source() {
        assert_eq!(ProposalSource::AiModel.entry_source(), EntrySource::Ai);
        assert_eq!(ProposalSource::BankRules.entry_source(), EntrySource::Bank);
        assert_eq!(ProposalSource::UserRule.entry_source(), EntrySource::Manual);
    }
}
