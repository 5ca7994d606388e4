//! Raw transaction aggregate.
//!
//! A transaction owns the proposed entries suggested for it, so every status
//! change of a proposal is decided against the transaction's current stream
//! version. Approval emits a single event that carries the complete
//! [`FinalEntry`]; there is no intermediate state where the proposal is
//! approved but the entry lines are missing.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use ezbooks_core::{
    Aggregate, AggregateRoot, Currency, DomainError, EntryId, ProposalId, TenantId, UserId,
};
use ezbooks_events::{Event, TenantScoped};

use crate::entry::{EntryHeader, FinalEntry};
use crate::ids::{AccountId, ReceiptId, TransactionId};
use crate::proposal::{ProposalEdits, ProposalStatus, ProposedEntry, Suggestion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Posted,
    Cleared,
    Reconciled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionSource {
    Bank,
    Manual,
}

/// User-visible fields of a transaction.
///
/// `amount` is signed: negative for money leaving the account (expenses),
/// positive for money coming in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetails {
    pub account_id: AccountId,
    pub external_id: Option<String>,
    pub amount: i64,
    pub currency: Currency,
    pub date: NaiveDate,
    pub merchant: Option<String>,
    pub description: String,
    pub category: Vec<String>,
    pub is_pending: bool,
    pub is_business: bool,
    pub status: TransactionStatus,
    pub source: TransactionSource,
}

impl TransactionDetails {
    pub fn is_expense(&self) -> bool {
        self.amount < 0
    }
}

/// Partial update of [`TransactionDetails`]; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionChanges {
    pub description: Option<String>,
    pub merchant: Option<String>,
    pub category: Option<Vec<String>>,
    pub amount: Option<i64>,
    pub date: Option<NaiveDate>,
    pub is_business: Option<bool>,
    pub is_pending: Option<bool>,
    pub status: Option<TransactionStatus>,
}

impl TransactionChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether the change invalidates an existing suggestion.
    pub fn affects_suggestion(&self) -> bool {
        self.description.is_some()
            || self.merchant.is_some()
            || self.category.is_some()
            || self.is_business.is_some()
    }

    /// Drop fields whose new value equals the current one.
    fn effective(&self, current: &TransactionDetails) -> Self {
        fn differs<T: PartialEq + Clone>(new: &Option<T>, old: &T) -> Option<T> {
            new.as_ref().filter(|v| *v != old).cloned()
        }

        Self {
            description: differs(&self.description, &current.description),
            merchant: self
                .merchant
                .clone()
                .filter(|m| current.merchant.as_deref() != Some(m.as_str())),
            category: differs(&self.category, &current.category),
            amount: differs(&self.amount, &current.amount),
            date: differs(&self.date, &current.date),
            is_business: differs(&self.is_business, &current.is_business),
            is_pending: differs(&self.is_pending, &current.is_pending),
            status: differs(&self.status, &current.status),
        }
    }
}

/// When the transaction reached each settled status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTimestamps {
    pub posted_at: Option<DateTime<Utc>>,
    pub cleared_at: Option<DateTime<Utc>>,
    pub reconciled_at: Option<DateTime<Utc>>,
}

impl StatusTimestamps {
    fn stamp(&mut self, status: TransactionStatus, at: DateTime<Utc>) {
        let slot = match status {
            TransactionStatus::Pending => return,
            TransactionStatus::Posted => &mut self.posted_at,
            TransactionStatus::Cleared => &mut self.cleared_at,
            TransactionStatus::Reconciled => &mut self.reconciled_at,
        };
        slot.get_or_insert(at);
    }
}

/// Aggregate root: Transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    id: TransactionId,
    tenant_id: Option<TenantId>,
    details: Option<TransactionDetails>,
    receipts: Vec<ReceiptId>,
    proposals: Vec<ProposedEntry>,
    timestamps: StatusTimestamps,
    removed_at: Option<DateTime<Utc>>,
    deleted: bool,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Transaction {
    pub fn empty(id: TransactionId) -> Self {
        Self {
            id,
            tenant_id: None,
            details: None,
            receipts: Vec::new(),
            proposals: Vec::new(),
            timestamps: StatusTimestamps::default(),
            removed_at: None,
            deleted: false,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TransactionId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn details(&self) -> Option<&TransactionDetails> {
        self.details.as_ref()
    }

    pub fn receipts(&self) -> &[ReceiptId] {
        &self.receipts
    }

    pub fn proposals(&self) -> &[ProposedEntry] {
        &self.proposals
    }

    pub fn proposal(&self, id: ProposalId) -> Option<&ProposedEntry> {
        self.proposals.iter().find(|p| p.id == id)
    }

    pub fn pending_proposal(&self) -> Option<&ProposedEntry> {
        self.proposals.iter().find(|p| p.is_pending())
    }

    pub fn approved_proposal(&self) -> Option<&ProposedEntry> {
        self.proposals
            .iter()
            .find(|p| p.status == ProposalStatus::Approved)
    }

    pub fn timestamps(&self) -> &StatusTimestamps {
        &self.timestamps
    }

    pub fn removed_at(&self) -> Option<DateTime<Utc>> {
        self.removed_at
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Recorded and not deleted.
    pub fn exists(&self) -> bool {
        self.created && !self.deleted
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn proposal_mut(&mut self, id: ProposalId) -> Option<&mut ProposedEntry> {
        self.proposals.iter_mut().find(|p| p.id == id)
    }
}

impl AggregateRoot for Transaction {
    type Id = TransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTransaction {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub details: TransactionDetails,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectTransaction {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub changes: TransactionChanges,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachReceipt {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub receipt_id: ReceiptId,
    pub occurred_at: DateTime<Utc>,
}

/// The bank withdrew the transaction (e.g. a pending charge that never settled).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkRemoved {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

/// Create a pending proposal, or revise the one that is already pending.
/// `proposal_id` is only used when a new proposal is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposeEntry {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub proposal_id: ProposalId,
    pub suggestion: Suggestion,
    pub occurred_at: DateTime<Utc>,
}

/// `debit_account_id` and `credit_account_id` are the accounts the caller
/// checked, after edits. The approval is refused if the pending proposal no
/// longer resolves to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveEntry {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub proposal_id: ProposalId,
    pub entry_id: EntryId,
    pub edits: ProposalEdits,
    pub debit_account_id: AccountId,
    pub credit_account_id: AccountId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectEntry {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub proposal_id: ProposalId,
    pub rejected_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTransaction {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransactionCommand {
    RecordTransaction(RecordTransaction),
    CorrectTransaction(CorrectTransaction),
    AttachReceipt(AttachReceipt),
    MarkRemoved(MarkRemoved),
    ProposeEntry(ProposeEntry),
    ApproveEntry(ApproveEntry),
    RejectEntry(RejectEntry),
    DeleteTransaction(DeleteTransaction),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecorded {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub details: TransactionDetails,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCorrected {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    /// Only the fields that actually changed.
    pub changes: TransactionChanges,
    /// A fresh suggestion should be generated.
    pub resuggest: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptAttached {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub receipt_id: ReceiptId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRemoved {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    /// Pending proposals rejected along with the removal.
    pub rejected_proposals: Vec<ProposalId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryProposed {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub proposal_id: ProposalId,
    pub suggestion: Suggestion,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRevised {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub proposal_id: ProposalId,
    pub suggestion: Suggestion,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryApproved {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub proposal_id: ProposalId,
    pub approved_by: UserId,
    pub entry: FinalEntry,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRejected {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub proposal_id: ProposalId,
    pub rejected_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDeleted {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    /// Every proposal that referenced the transaction.
    pub discarded_proposals: Vec<ProposalId>,
    pub receipts: Vec<ReceiptId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransactionEvent {
    TransactionRecorded(TransactionRecorded),
    TransactionCorrected(TransactionCorrected),
    ReceiptAttached(ReceiptAttached),
    TransactionRemoved(TransactionRemoved),
    EntryProposed(EntryProposed),
    EntryRevised(EntryRevised),
    EntryApproved(EntryApproved),
    EntryRejected(EntryRejected),
    TransactionDeleted(TransactionDeleted),
}

impl Event for TransactionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransactionEvent::TransactionRecorded(_) => "accounting.transaction.recorded",
            TransactionEvent::TransactionCorrected(_) => "accounting.transaction.corrected",
            TransactionEvent::ReceiptAttached(_) => "accounting.transaction.receipt_attached",
            TransactionEvent::TransactionRemoved(_) => "accounting.transaction.removed",
            TransactionEvent::EntryProposed(_) => "accounting.transaction.entry_proposed",
            TransactionEvent::EntryRevised(_) => "accounting.transaction.entry_revised",
            TransactionEvent::EntryApproved(_) => "accounting.transaction.entry_approved",
            TransactionEvent::EntryRejected(_) => "accounting.transaction.entry_rejected",
            TransactionEvent::TransactionDeleted(_) => "accounting.transaction.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransactionEvent::TransactionRecorded(e) => e.occurred_at,
            TransactionEvent::TransactionCorrected(e) => e.occurred_at,
            TransactionEvent::ReceiptAttached(e) => e.occurred_at,
            TransactionEvent::TransactionRemoved(e) => e.occurred_at,
            TransactionEvent::EntryProposed(e) => e.occurred_at,
            TransactionEvent::EntryRevised(e) => e.occurred_at,
            TransactionEvent::EntryApproved(e) => e.occurred_at,
            TransactionEvent::EntryRejected(e) => e.occurred_at,
            TransactionEvent::TransactionDeleted(e) => e.occurred_at,
        }
    }
}

impl TenantScoped for TransactionEvent {
    fn tenant_id(&self) -> TenantId {
        match self {
            TransactionEvent::TransactionRecorded(e) => e.tenant_id,
            TransactionEvent::TransactionCorrected(e) => e.tenant_id,
            TransactionEvent::ReceiptAttached(e) => e.tenant_id,
            TransactionEvent::TransactionRemoved(e) => e.tenant_id,
            TransactionEvent::EntryProposed(e) => e.tenant_id,
            TransactionEvent::EntryRevised(e) => e.tenant_id,
            TransactionEvent::EntryApproved(e) => e.tenant_id,
            TransactionEvent::EntryRejected(e) => e.tenant_id,
            TransactionEvent::TransactionDeleted(e) => e.tenant_id,
        }
    }
}

impl Aggregate for Transaction {
    type Command = TransactionCommand;
    type Event = TransactionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransactionEvent::TransactionRecorded(e) => {
                self.id = e.transaction_id;
                self.tenant_id = Some(e.tenant_id);
                self.timestamps.stamp(e.details.status, e.occurred_at);
                self.details = Some(e.details.clone());
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            TransactionEvent::TransactionCorrected(e) => {
                if let Some(details) = self.details.as_mut() {
                    let c = &e.changes;
                    if let Some(v) = &c.description {
                        details.description = v.clone();
                    }
                    if let Some(v) = &c.merchant {
                        details.merchant = Some(v.clone());
                    }
                    if let Some(v) = &c.category {
                        details.category = v.clone();
                    }
                    if let Some(v) = c.amount {
                        details.amount = v;
                    }
                    if let Some(v) = c.date {
                        details.date = v;
                    }
                    if let Some(v) = c.is_business {
                        details.is_business = v;
                    }
                    if let Some(v) = c.is_pending {
                        details.is_pending = v;
                    }
                    if let Some(v) = c.status {
                        details.status = v;
                        self.timestamps.stamp(v, e.occurred_at);
                    }
                }
            }
            TransactionEvent::ReceiptAttached(e) => {
                if !self.receipts.contains(&e.receipt_id) {
                    self.receipts.push(e.receipt_id);
                }
            }
            TransactionEvent::TransactionRemoved(e) => {
                self.removed_at = Some(e.occurred_at);
                for id in &e.rejected_proposals {
                    if let Some(p) = self.proposal_mut(*id) {
                        p.status = ProposalStatus::Rejected;
                        p.decided_at = Some(e.occurred_at);
                        p.updated_at = e.occurred_at;
                    }
                }
            }
            TransactionEvent::EntryProposed(e) => {
                self.proposals.push(ProposedEntry {
                    id: e.proposal_id,
                    transaction_id: e.transaction_id,
                    suggestion: e.suggestion.clone(),
                    status: ProposalStatus::Pending,
                    created_at: e.occurred_at,
                    updated_at: e.occurred_at,
                    decided_at: None,
                    decided_by: None,
                    final_entry_id: None,
                });
            }
            TransactionEvent::EntryRevised(e) => {
                if let Some(p) = self.proposal_mut(e.proposal_id) {
                    p.suggestion = e.suggestion.clone();
                    p.updated_at = e.occurred_at;
                }
            }
            TransactionEvent::EntryApproved(e) => {
                if let Some(p) = self.proposal_mut(e.proposal_id) {
                    p.status = ProposalStatus::Approved;
                    p.decided_at = Some(e.occurred_at);
                    p.decided_by = Some(e.approved_by);
                    p.final_entry_id = Some(e.entry.id());
                    p.updated_at = e.occurred_at;
                }
            }
            TransactionEvent::EntryRejected(e) => {
                if let Some(p) = self.proposal_mut(e.proposal_id) {
                    p.status = ProposalStatus::Rejected;
                    p.decided_at = Some(e.occurred_at);
                    p.decided_by = Some(e.rejected_by);
                    p.updated_at = e.occurred_at;
                }
            }
            TransactionEvent::TransactionDeleted(_) => {
                self.proposals.clear();
                self.receipts.clear();
                self.deleted = true;
            }
        }

        self.updated_at = Some(Event::occurred_at(event));
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransactionCommand::RecordTransaction(cmd) => self.handle_record(cmd),
            TransactionCommand::CorrectTransaction(cmd) => self.handle_correct(cmd),
            TransactionCommand::AttachReceipt(cmd) => self.handle_attach_receipt(cmd),
            TransactionCommand::MarkRemoved(cmd) => self.handle_mark_removed(cmd),
            TransactionCommand::ProposeEntry(cmd) => self.handle_propose(cmd),
            TransactionCommand::ApproveEntry(cmd) => self.handle_approve(cmd),
            TransactionCommand::RejectEntry(cmd) => self.handle_reject(cmd),
            TransactionCommand::DeleteTransaction(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Transaction {
    fn ensure_existing(
        &self,
        tenant_id: TenantId,
        transaction_id: TransactionId,
    ) -> Result<&TransactionDetails, DomainError> {
        if !self.created || self.deleted {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != transaction_id {
            return Err(DomainError::invariant("transaction_id mismatch"));
        }
        self.details.as_ref().ok_or_else(DomainError::not_found)
    }

    fn ensure_not_removed(&self) -> Result<(), DomainError> {
        if self.removed_at.is_some() {
            return Err(DomainError::conflict("transaction was removed by the bank"));
        }
        Ok(())
    }

    fn find_proposal(&self, id: ProposalId) -> Result<&ProposedEntry, DomainError> {
        self.proposal(id).ok_or_else(DomainError::not_found)
    }

    fn handle_record(&self, cmd: &RecordTransaction) -> Result<Vec<TransactionEvent>, DomainError> {
        if self.deleted {
            return Err(DomainError::conflict("transaction was deleted"));
        }
        if self.created {
            return Err(DomainError::conflict("transaction already recorded"));
        }

        let d = &cmd.details;
        if d.amount == 0 {
            return Err(DomainError::validation("amount cannot be zero"));
        }
        let description = d.description.trim();
        if description.is_empty() {
            return Err(DomainError::validation("description cannot be empty"));
        }
        if d.external_id.as_deref().is_some_and(|e| e.trim().is_empty()) {
            return Err(DomainError::validation("external_id cannot be empty"));
        }

        let details = TransactionDetails {
            description: description.to_string(),
            merchant: d
                .merchant
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string),
            category: normalize_category(&d.category),
            ..d.clone()
        };

        Ok(vec![TransactionEvent::TransactionRecorded(TransactionRecorded {
            tenant_id: cmd.tenant_id,
            transaction_id: cmd.transaction_id,
            details,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_correct(&self, cmd: &CorrectTransaction) -> Result<Vec<TransactionEvent>, DomainError> {
        let details = self.ensure_existing(cmd.tenant_id, cmd.transaction_id)?;
        self.ensure_not_removed()?;

        let mut changes = cmd.changes.clone();
        if let Some(description) = changes.description.as_mut() {
            let trimmed = description.trim();
            if trimmed.is_empty() {
                return Err(DomainError::validation("description cannot be empty"));
            }
            *description = trimmed.to_string();
        }
        if changes.amount == Some(0) {
            return Err(DomainError::validation("amount cannot be zero"));
        }
        if let Some(category) = changes.category.as_mut() {
            *category = normalize_category(category);
        }

        let changes = changes.effective(details);
        if changes.is_empty() {
            return Ok(vec![]);
        }

        // A posted transaction keeps its entry; there is nothing to re-suggest.
        let resuggest = changes.affects_suggestion() && self.approved_proposal().is_none();

        Ok(vec![TransactionEvent::TransactionCorrected(TransactionCorrected {
            tenant_id: cmd.tenant_id,
            transaction_id: cmd.transaction_id,
            changes,
            resuggest,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_attach_receipt(&self, cmd: &AttachReceipt) -> Result<Vec<TransactionEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.transaction_id)?;

        if self.receipts.contains(&cmd.receipt_id) {
            return Ok(vec![]);
        }

        Ok(vec![TransactionEvent::ReceiptAttached(ReceiptAttached {
            tenant_id: cmd.tenant_id,
            transaction_id: cmd.transaction_id,
            receipt_id: cmd.receipt_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_removed(&self, cmd: &MarkRemoved) -> Result<Vec<TransactionEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.transaction_id)?;

        if self.removed_at.is_some() {
            return Ok(vec![]);
        }

        let rejected_proposals = self
            .proposals
            .iter()
            .filter(|p| p.is_pending())
            .map(|p| p.id)
            .collect();

        Ok(vec![TransactionEvent::TransactionRemoved(TransactionRemoved {
            tenant_id: cmd.tenant_id,
            transaction_id: cmd.transaction_id,
            rejected_proposals,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_propose(&self, cmd: &ProposeEntry) -> Result<Vec<TransactionEvent>, DomainError> {
        let details = self.ensure_existing(cmd.tenant_id, cmd.transaction_id)?;
        self.ensure_not_removed()?;

        if self.approved_proposal().is_some() {
            return Err(DomainError::conflict("transaction already has an approved entry"));
        }

        cmd.suggestion.validate()?;
        if cmd.suggestion.currency != details.currency {
            return Err(DomainError::validation(
                "proposal currency must match the transaction currency",
            ));
        }

        if let Some(pending) = self.pending_proposal() {
            return Ok(vec![TransactionEvent::EntryRevised(EntryRevised {
                tenant_id: cmd.tenant_id,
                transaction_id: cmd.transaction_id,
                proposal_id: pending.id,
                suggestion: cmd.suggestion.clone(),
                occurred_at: cmd.occurred_at,
            })]);
        }

        if self.proposal(cmd.proposal_id).is_some() {
            return Err(DomainError::conflict("proposal id already used"));
        }

        Ok(vec![TransactionEvent::EntryProposed(EntryProposed {
            tenant_id: cmd.tenant_id,
            transaction_id: cmd.transaction_id,
            proposal_id: cmd.proposal_id,
            suggestion: cmd.suggestion.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveEntry) -> Result<Vec<TransactionEvent>, DomainError> {
        let details = self.ensure_existing(cmd.tenant_id, cmd.transaction_id)?;
        let proposal = self.find_proposal(cmd.proposal_id)?;
        proposal.ensure_pending()?;
        self.ensure_not_removed()?;

        if self.approved_proposal().is_some() {
            return Err(DomainError::conflict("transaction already has an approved entry"));
        }

        let debit = proposal.effective_debit(&cmd.edits);
        let credit = proposal.effective_credit(&cmd.edits);
        if (debit, credit) != (cmd.debit_account_id, cmd.credit_account_id) {
            return Err(DomainError::conflict("proposal was revised after it was reviewed"));
        }

        let s = &proposal.suggestion;
        let memo = cmd
            .edits
            .memo
            .clone()
            .or_else(|| s.memo.clone())
            .or_else(|| Some(details.description.clone()));

        let header = EntryHeader {
            entry_id: cmd.entry_id,
            date: details.date,
            memo,
            source: s.source.entry_source(),
            transaction_id: Some(self.id),
            proposal_id: Some(proposal.id),
            is_business: cmd.edits.is_business.unwrap_or(s.is_business),
            approved_by: Some(cmd.approved_by),
            posted_at: cmd.occurred_at,
        };

        let entry = FinalEntry::balanced_pair(
            header,
            debit,
            credit,
            s.amount,
            s.currency.clone(),
        )?;

        Ok(vec![TransactionEvent::EntryApproved(EntryApproved {
            tenant_id: cmd.tenant_id,
            transaction_id: cmd.transaction_id,
            proposal_id: proposal.id,
            approved_by: cmd.approved_by,
            entry,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectEntry) -> Result<Vec<TransactionEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.transaction_id)?;
        let proposal = self.find_proposal(cmd.proposal_id)?;
        proposal.ensure_pending()?;

        Ok(vec![TransactionEvent::EntryRejected(EntryRejected {
            tenant_id: cmd.tenant_id,
            transaction_id: cmd.transaction_id,
            proposal_id: proposal.id,
            rejected_by: cmd.rejected_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteTransaction) -> Result<Vec<TransactionEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.transaction_id)?;

        Ok(vec![TransactionEvent::TransactionDeleted(TransactionDeleted {
            tenant_id: cmd.tenant_id,
            transaction_id: cmd.transaction_id,
            discarded_proposals: self.proposals.iter().map(|p| p.id).collect(),
            receipts: self.receipts.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn normalize_category(category: &[String]) -> Vec<String> {
    category
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}
