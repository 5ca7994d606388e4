//! Bookkeeping application service.
//!
//! Aggregates only see their own stream. Everything that spans streams lives
//! here: checking that referenced accounts exist in the tenant's chart and
//! are active, cascading a transaction delete to its receipts, mapping bank
//! sync removals to transaction ids, and turning engine output into
//! `ProposeEntry` commands.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use ezbooks_accounting::{
    Account, AccountCommand, AccountId, AccountKind, AlternativeEntry, ApproveEntry, ArchiveAccount,
    AttachReceipt, CaptureReceipt, CorrectTransaction, DeleteTransaction, DiscardReceipt,
    EntryHeader, EntrySource, FinalEntry, Ledger, LedgerCommand, LedgerId, LinkExternalAccount,
    LinkTransaction, MarkRemoved, OcrFields, OpenAccount, PostManualEntry, ProposalEdits,
    ProposalSource, ProposeEntry, ProposedEntry, Receipt, ReceiptCommand, ReceiptFile, ReceiptId,
    RecordOcr, RecordTransaction, RejectEntry, RenameAccount, Suggestion, SyncBalance, Transaction,
    TransactionChanges, TransactionCommand, TransactionDetails, TransactionEvent, TransactionId,
    TransactionSource, TransactionStatus, aggregate_types,
};
use ezbooks_ai::{
    AccountClass, AccountSnapshot, AiError, AiScheduler, BusinessContext, DuplicateMatch,
    DuplicateQuery, EntrySuggestion, EntrySuggestionJob, LocalAiScheduler, Overrides,
    SuggestionInput, TransactionSnapshot, alternatives, find_duplicate, suggest_entry,
};
use ezbooks_core::{Currency, DomainError, EntryId, ProposalId, TenantId, UserId};
use ezbooks_events::{EventBus, EventEnvelope, InMemoryEventBus};

use crate::ai::{SuggestionError, SuggestionQueue, SuggestionRequest, SuggestionTarget};
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, InMemoryEventStore, StoredEvent};
use crate::projections::{ReadModels, TransactionView};

#[derive(Debug, Error)]
pub enum BookkeepingError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A referenced account or field is unusable.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Suggestion(#[from] AiError),

    /// Read models have not caught up yet.
    #[error("temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BookkeepingError {
    pub fn is_transient(&self) -> bool {
        match self {
            BookkeepingError::Dispatch(e) => {
                e.is_retryable() || matches!(e, DispatchError::Publish(_) | DispatchError::Store(_))
            }
            BookkeepingError::Unavailable(_) => true,
            BookkeepingError::Suggestion(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<DomainError> for BookkeepingError {
    fn from(value: DomainError) -> Self {
        BookkeepingError::Dispatch(value.into())
    }
}

pub type BookkeepingResult<T> = Result<T, BookkeepingError>;

/// Single-process wiring used by the server and tests.
pub type InMemoryBookkeeping =
    Bookkeeping<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewAccount {
    pub name: String,
    pub kind: AccountKind,
    #[serde(default)]
    pub is_business: bool,
    #[serde(default)]
    pub currency: Currency,
    #[serde(default)]
    pub external_account_id: Option<String>,
    #[serde(default)]
    pub opening_balance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewTransaction {
    pub account_id: AccountId,
    /// Aggregator id; recording the same one twice is a conflict.
    #[serde(default)]
    pub external_id: Option<String>,
    /// Signed minor units, negative for money out.
    pub amount: i64,
    pub date: NaiveDate,
    #[serde(default)]
    pub merchant: Option<String>,
    pub description: String,
    #[serde(default)]
    pub category: Vec<String>,
    #[serde(default)]
    pub is_pending: bool,
    #[serde(default)]
    pub is_business: bool,
    /// Defaults to `pending` or `posted` from `is_pending`.
    #[serde(default)]
    pub status: Option<TransactionStatus>,
    /// Defaults to `bank` when an external id is present.
    #[serde(default)]
    pub source: Option<TransactionSource>,
}

/// A reviewer-written proposal for a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManualProposal {
    pub debit_account_id: AccountId,
    pub credit_account_id: AccountId,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub is_business: Option<bool>,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// A journal posting not tied to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewManualEntry {
    pub date: NaiveDate,
    #[serde(default)]
    pub memo: Option<String>,
    pub debit_account_id: AccountId,
    pub credit_account_id: AccountId,
    /// Positive minor units.
    pub amount: i64,
    #[serde(default)]
    pub is_business: bool,
    #[serde(default)]
    pub adjustment: bool,
}

/// Orchestrates commands across the accounting aggregates.
#[derive(Debug)]
pub struct Bookkeeping<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    read: Arc<ReadModels>,
    profiles: RwLock<HashMap<TenantId, BusinessContext>>,
    suggestions: Option<SuggestionQueue>,
}

impl<S, B> Bookkeeping<S, B> {
    pub fn new(dispatcher: CommandDispatcher<S, B>, read: Arc<ReadModels>) -> Self {
        Self {
            dispatcher,
            read,
            profiles: RwLock::new(HashMap::new()),
            suggestions: None,
        }
    }

    /// Queue a suggestion for every recorded (or materially corrected)
    /// transaction.
    pub fn with_suggestions(mut self, queue: SuggestionQueue) -> Self {
        self.suggestions = Some(queue);
        self
    }

    pub fn read_models(&self) -> &ReadModels {
        &self.read
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    pub fn set_business_profile(&self, tenant_id: TenantId, profile: BusinessContext) {
        if let Ok(mut profiles) = self.profiles.write() {
            profiles.insert(tenant_id, profile);
        }
    }

    pub fn business_profile(&self, tenant_id: TenantId) -> Option<BusinessContext> {
        self.profiles.read().ok()?.get(&tenant_id).cloned()
    }
}

impl<S, B> Bookkeeping<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    // ---- accounts -------------------------------------------------------

    pub fn open_account(&self, tenant_id: TenantId, input: NewAccount) -> BookkeepingResult<AccountId> {
        let account_id = AccountId::generate();
        self.dispatch_account(
            tenant_id,
            account_id,
            AccountCommand::OpenAccount(OpenAccount {
                tenant_id,
                account_id,
                name: input.name,
                kind: input.kind,
                is_business: input.is_business,
                currency: input.currency,
                external_account_id: input.external_account_id,
                opening_balance: input.opening_balance,
                occurred_at: Utc::now(),
            }),
        )?;
        info!(tenant_id = %tenant_id, account_id = %account_id, "account opened");
        Ok(account_id)
    }

    pub fn rename_account(&self, tenant_id: TenantId, account_id: AccountId, name: String) -> BookkeepingResult<()> {
        self.dispatch_account(
            tenant_id,
            account_id,
            AccountCommand::RenameAccount(RenameAccount {
                tenant_id,
                account_id,
                name,
                occurred_at: Utc::now(),
            }),
        )
        .map(drop)
    }

    pub fn link_external_account(
        &self,
        tenant_id: TenantId,
        account_id: AccountId,
        external_account_id: String,
    ) -> BookkeepingResult<()> {
        self.dispatch_account(
            tenant_id,
            account_id,
            AccountCommand::LinkExternalAccount(LinkExternalAccount {
                tenant_id,
                account_id,
                external_account_id,
                occurred_at: Utc::now(),
            }),
        )
        .map(drop)
    }

    pub fn sync_balance(&self, tenant_id: TenantId, account_id: AccountId, balance: i64) -> BookkeepingResult<()> {
        self.dispatch_account(
            tenant_id,
            account_id,
            AccountCommand::SyncBalance(SyncBalance {
                tenant_id,
                account_id,
                balance,
                occurred_at: Utc::now(),
            }),
        )
        .map(drop)
    }

    pub fn archive_account(&self, tenant_id: TenantId, account_id: AccountId) -> BookkeepingResult<()> {
        self.dispatch_account(
            tenant_id,
            account_id,
            AccountCommand::ArchiveAccount(ArchiveAccount {
                tenant_id,
                account_id,
                occurred_at: Utc::now(),
            }),
        )
        .map(drop)
    }

    // ---- transactions ---------------------------------------------------

    pub fn record_transaction(&self, tenant_id: TenantId, input: NewTransaction) -> BookkeepingResult<TransactionId> {
        let account = self.postable_account(tenant_id, input.account_id)?;

        let external_id = input
            .external_id
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());
        let transaction_id = match external_id.as_deref() {
            Some(ext) => TransactionId::for_external(tenant_id, ext),
            None => TransactionId::generate(),
        };

        let status = input.status.unwrap_or(if input.is_pending {
            TransactionStatus::Pending
        } else {
            TransactionStatus::Posted
        });
        let source = input.source.unwrap_or(if external_id.is_some() {
            TransactionSource::Bank
        } else {
            TransactionSource::Manual
        });

        self.dispatch_transaction(
            tenant_id,
            transaction_id,
            TransactionCommand::RecordTransaction(RecordTransaction {
                tenant_id,
                transaction_id,
                details: TransactionDetails {
                    account_id: input.account_id,
                    external_id,
                    amount: input.amount,
                    currency: account.currency().clone(),
                    date: input.date,
                    merchant: input.merchant,
                    description: input.description,
                    category: input.category,
                    is_pending: input.is_pending,
                    is_business: input.is_business,
                    status,
                    source,
                },
                occurred_at: Utc::now(),
            }),
        )?;

        info!(tenant_id = %tenant_id, transaction_id = %transaction_id, "transaction recorded");
        self.enqueue_suggestion(SuggestionRequest::new(tenant_id, transaction_id));
        Ok(transaction_id)
    }

    /// Returns whether the correction invalidated the current suggestion (a
    /// new one is queued in that case).
    pub fn correct_transaction(
        &self,
        tenant_id: TenantId,
        transaction_id: TransactionId,
        changes: TransactionChanges,
    ) -> BookkeepingResult<bool> {
        let committed = self.dispatch_transaction(
            tenant_id,
            transaction_id,
            TransactionCommand::CorrectTransaction(CorrectTransaction {
                tenant_id,
                transaction_id,
                changes,
                occurred_at: Utc::now(),
            }),
        )?;

        let resuggest = committed.iter().any(|stored| {
            matches!(
                decode::<TransactionEvent>(stored),
                Ok(TransactionEvent::TransactionCorrected(e)) if e.resuggest
            )
        });
        if resuggest {
            self.enqueue_suggestion(SuggestionRequest::new(tenant_id, transaction_id));
        }
        Ok(resuggest)
    }

    /// Deletes the transaction with every proposal; receipts attached to it
    /// are discarded afterwards. Returns the discarded proposal ids.
    pub fn delete_transaction(
        &self,
        tenant_id: TenantId,
        transaction_id: TransactionId,
    ) -> BookkeepingResult<Vec<ProposalId>> {
        let committed = self.dispatch_transaction(
            tenant_id,
            transaction_id,
            TransactionCommand::DeleteTransaction(DeleteTransaction {
                tenant_id,
                transaction_id,
                occurred_at: Utc::now(),
            }),
        )?;

        let deleted = committed
            .iter()
            .find_map(|stored| match decode::<TransactionEvent>(stored) {
                Ok(TransactionEvent::TransactionDeleted(e)) => Some(e),
                _ => None,
            })
            .ok_or_else(|| BookkeepingError::Internal("delete committed no TransactionDeleted event".into()))?;

        for receipt_id in &deleted.receipts {
            let res = self.dispatch_receipt(
                tenant_id,
                *receipt_id,
                ReceiptCommand::DiscardReceipt(DiscardReceipt {
                    tenant_id,
                    receipt_id: *receipt_id,
                    occurred_at: Utc::now(),
                }),
            );
            if let Err(err) = res {
                warn!(
                    tenant_id = %tenant_id,
                    transaction_id = %transaction_id,
                    receipt_id = %receipt_id,
                    error = %err,
                    "failed to discard receipt of deleted transaction"
                );
            }
        }

        info!(
            tenant_id = %tenant_id,
            transaction_id = %transaction_id,
            proposals = deleted.discarded_proposals.len(),
            "transaction deleted"
        );
        Ok(deleted.discarded_proposals)
    }

    /// Marks bank-withdrawn transactions as removed. Unknown external ids are
    /// skipped; returns the transactions that changed.
    pub fn remove_bank_transactions(
        &self,
        tenant_id: TenantId,
        external_ids: &[String],
    ) -> BookkeepingResult<Vec<TransactionId>> {
        let mut removed = Vec::new();
        for ext in external_ids.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
            let transaction_id = TransactionId::for_external(tenant_id, ext);
            let res = self.dispatch_transaction(
                tenant_id,
                transaction_id,
                TransactionCommand::MarkRemoved(MarkRemoved {
                    tenant_id,
                    transaction_id,
                    occurred_at: Utc::now(),
                }),
            );
            match res {
                Ok(committed) if !committed.is_empty() => removed.push(transaction_id),
                Ok(_) => {}
                Err(BookkeepingError::Dispatch(DispatchError::NotFound)) => {
                    debug!(tenant_id = %tenant_id, external_id = ext, "removal for unknown transaction ignored");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(removed)
    }

    // ---- proposals ------------------------------------------------------

    /// Queue a fresh suggestion, or run it inline when no runner is wired.
    pub fn request_suggestion(
        &self,
        tenant_id: TenantId,
        transaction_id: TransactionId,
        overrides: Overrides,
    ) -> BookkeepingResult<()> {
        self.transaction(tenant_id, transaction_id)?;
        let request = SuggestionRequest::new(tenant_id, transaction_id).with_overrides(overrides);
        match &self.suggestions {
            Some(queue) if queue.submit(request) => Ok(()),
            Some(_) => Err(BookkeepingError::Unavailable("suggestion queue is full".into())),
            None => self.suggest_now(tenant_id, transaction_id, overrides).map(drop),
        }
    }

    /// Run the suggestion engine and store its result as the pending
    /// proposal. `None` when the transaction is removed or already posted.
    pub fn suggest_now(
        &self,
        tenant_id: TenantId,
        transaction_id: TransactionId,
        overrides: Overrides,
    ) -> BookkeepingResult<Option<ProposedEntry>> {
        let txn = self.transaction(tenant_id, transaction_id)?;
        if txn.removed_at().is_some() || txn.approved_proposal().is_some() {
            return Ok(None);
        }
        let details = txn
            .details()
            .ok_or_else(|| BookkeepingError::Internal("recorded transaction without details".into()))?;

        let input = self.suggestion_input(tenant_id, &txn, overrides)?;
        let outcome = LocalAiScheduler::for_tenant(tenant_id).run(EntrySuggestionJob::new(tenant_id, input))?;

        let primary = &outcome.primary;
        let suggestion = Suggestion {
            debit_account_id: AccountId::new(primary.debit_account_id),
            credit_account_id: AccountId::new(primary.credit_account_id),
            amount: primary.amount,
            currency: details.currency.clone(),
            confidence: primary.confidence,
            explanation: primary.explanation.clone(),
            memo: primary.memo.clone(),
            is_business: details.is_business,
            source: ProposalSource::AiModel,
            alternatives: outcome
                .alternatives
                .iter()
                .map(|a| AlternativeEntry {
                    debit_account_id: AccountId::new(a.debit_account_id),
                    credit_account_id: AccountId::new(a.credit_account_id),
                    explanation: a.explanation.clone(),
                    confidence: a.confidence,
                })
                .collect(),
        };

        self.propose(tenant_id, transaction_id, suggestion).map(Some)
    }

    pub fn propose_entry(
        &self,
        tenant_id: TenantId,
        transaction_id: TransactionId,
        proposal: ManualProposal,
    ) -> BookkeepingResult<ProposedEntry> {
        let txn = self.transaction(tenant_id, transaction_id)?;
        let details = txn
            .details()
            .ok_or_else(|| BookkeepingError::Internal("recorded transaction without details".into()))?;
        self.distinct_postable(tenant_id, proposal.debit_account_id, proposal.credit_account_id)?;

        let suggestion = Suggestion {
            debit_account_id: proposal.debit_account_id,
            credit_account_id: proposal.credit_account_id,
            amount: details.amount.abs(),
            currency: details.currency.clone(),
            confidence: 1.0,
            explanation: proposal.explanation.unwrap_or_else(|| "Manual entry".to_string()),
            memo: proposal.memo,
            is_business: proposal.is_business.unwrap_or(details.is_business),
            source: ProposalSource::Manual,
            alternatives: vec![],
        };

        self.propose(tenant_id, transaction_id, suggestion)
    }

    /// Approve a pending proposal, posting its final entry.
    ///
    /// A proposal that is no longer pending (including one approved by a
    /// concurrent request) is a conflict, as is one revised onto other
    /// accounts between the checks here and the append.
    pub fn approve_entry(
        &self,
        tenant_id: TenantId,
        transaction_id: TransactionId,
        proposal_id: ProposalId,
        edits: ProposalEdits,
        approved_by: UserId,
    ) -> BookkeepingResult<FinalEntry> {
        let txn = self.transaction(tenant_id, transaction_id)?;
        let proposal = txn.proposal(proposal_id).ok_or(DispatchError::NotFound)?;
        proposal.ensure_pending()?;
        let debit_account_id = proposal.effective_debit(&edits);
        let credit_account_id = proposal.effective_credit(&edits);
        self.distinct_postable(tenant_id, debit_account_id, credit_account_id)?;

        let committed = self.dispatch_transaction(
            tenant_id,
            transaction_id,
            TransactionCommand::ApproveEntry(ApproveEntry {
                tenant_id,
                transaction_id,
                proposal_id,
                entry_id: EntryId::new(),
                edits,
                debit_account_id,
                credit_account_id,
                approved_by,
                occurred_at: Utc::now(),
            }),
        )?;

        let entry = committed
            .iter()
            .find_map(|stored| match decode::<TransactionEvent>(stored) {
                Ok(TransactionEvent::EntryApproved(e)) => Some(e.entry),
                _ => None,
            })
            .ok_or_else(|| BookkeepingError::Internal("approval committed no EntryApproved event".into()))?;

        info!(
            tenant_id = %tenant_id,
            transaction_id = %transaction_id,
            proposal_id = %proposal_id,
            entry_id = %entry.id(),
            "entry approved"
        );
        Ok(entry)
    }

    pub fn reject_entry(
        &self,
        tenant_id: TenantId,
        transaction_id: TransactionId,
        proposal_id: ProposalId,
        rejected_by: UserId,
    ) -> BookkeepingResult<()> {
        self.dispatch_transaction(
            tenant_id,
            transaction_id,
            TransactionCommand::RejectEntry(RejectEntry {
                tenant_id,
                transaction_id,
                proposal_id,
                rejected_by,
                occurred_at: Utc::now(),
            }),
        )?;
        info!(tenant_id = %tenant_id, transaction_id = %transaction_id, proposal_id = %proposal_id, "entry rejected");
        Ok(())
    }

    /// Alternative debit/credit pairs for a transaction, best first.
    pub fn alternatives(
        &self,
        tenant_id: TenantId,
        transaction_id: TransactionId,
    ) -> BookkeepingResult<Vec<EntrySuggestion>> {
        let txn = self.transaction(tenant_id, transaction_id)?;
        let input = self.suggestion_input(tenant_id, &txn, Overrides::default())?;
        let primary = suggest_entry(&input)?;
        Ok(alternatives(&input, &primary))
    }

    /// Most likely earlier copy of this transaction, if any scores high
    /// enough.
    pub fn find_duplicate(
        &self,
        tenant_id: TenantId,
        transaction_id: TransactionId,
    ) -> BookkeepingResult<Option<DuplicateMatch>> {
        let txn = self.transaction(tenant_id, transaction_id)?;
        let details = txn
            .details()
            .ok_or_else(|| BookkeepingError::Internal("recorded transaction without details".into()))?;

        let query = DuplicateQuery {
            merchant: details.merchant.clone().unwrap_or_else(|| details.description.clone()),
            amount: details.amount,
            date: details.date,
            exclude: Some(transaction_id.0),
        };
        let candidates: Vec<TransactionSnapshot> = self
            .read
            .transactions
            .list(tenant_id)
            .iter()
            .filter(|t| t.removed_at.is_none())
            .map(view_snapshot)
            .collect();

        Ok(find_duplicate(&query, &candidates))
    }

    // ---- ledger ---------------------------------------------------------

    pub fn post_manual_entry(
        &self,
        tenant_id: TenantId,
        input: NewManualEntry,
        posted_by: UserId,
    ) -> BookkeepingResult<FinalEntry> {
        let (debit, credit) =
            self.distinct_postable(tenant_id, input.debit_account_id, input.credit_account_id)?;
        if debit.currency() != credit.currency() {
            return Err(BookkeepingError::Validation(
                "debit and credit accounts use different currencies".into(),
            ));
        }

        let header = EntryHeader {
            entry_id: EntryId::new(),
            date: input.date,
            memo: input.memo,
            source: if input.adjustment {
                EntrySource::Adjustment
            } else {
                EntrySource::Manual
            },
            transaction_id: None,
            proposal_id: None,
            is_business: input.is_business,
            approved_by: Some(posted_by),
            posted_at: Utc::now(),
        };
        let entry = FinalEntry::balanced_pair(
            header,
            input.debit_account_id,
            input.credit_account_id,
            input.amount,
            debit.currency().clone(),
        )?;

        let ledger_id = LedgerId::general(tenant_id);
        self.dispatcher.dispatch::<Ledger>(
            tenant_id,
            ledger_id.0,
            aggregate_types::LEDGER,
            &LedgerCommand::PostManualEntry(PostManualEntry {
                tenant_id,
                ledger_id,
                entry: entry.clone(),
                occurred_at: entry.header.posted_at,
            }),
            |_, id| Ledger::empty(LedgerId::new(id)),
        )?;

        info!(tenant_id = %tenant_id, entry_id = %entry.id(), "manual entry posted");
        Ok(entry)
    }

    // ---- receipts -------------------------------------------------------

    pub fn capture_receipt(
        &self,
        tenant_id: TenantId,
        file: ReceiptFile,
        transaction_id: Option<TransactionId>,
    ) -> BookkeepingResult<ReceiptId> {
        if let Some(txn) = transaction_id {
            self.transaction(tenant_id, txn)?;
        }

        let receipt_id = ReceiptId::generate();
        self.dispatch_receipt(
            tenant_id,
            receipt_id,
            ReceiptCommand::CaptureReceipt(CaptureReceipt {
                tenant_id,
                receipt_id,
                file,
                transaction_id,
                occurred_at: Utc::now(),
            }),
        )?;

        if let Some(txn) = transaction_id {
            self.attach_receipt(tenant_id, txn, receipt_id)?;
        }
        Ok(receipt_id)
    }

    pub fn record_ocr(&self, tenant_id: TenantId, receipt_id: ReceiptId, fields: OcrFields) -> BookkeepingResult<()> {
        self.dispatch_receipt(
            tenant_id,
            receipt_id,
            ReceiptCommand::RecordOcr(RecordOcr {
                tenant_id,
                receipt_id,
                fields,
                occurred_at: Utc::now(),
            }),
        )
        .map(drop)
    }

    pub fn link_receipt(
        &self,
        tenant_id: TenantId,
        receipt_id: ReceiptId,
        transaction_id: TransactionId,
    ) -> BookkeepingResult<()> {
        self.transaction(tenant_id, transaction_id)?;
        self.dispatch_receipt(
            tenant_id,
            receipt_id,
            ReceiptCommand::LinkTransaction(LinkTransaction {
                tenant_id,
                receipt_id,
                transaction_id,
                occurred_at: Utc::now(),
            }),
        )?;
        self.attach_receipt(tenant_id, transaction_id, receipt_id)
    }

    // ---- helpers --------------------------------------------------------

    fn attach_receipt(
        &self,
        tenant_id: TenantId,
        transaction_id: TransactionId,
        receipt_id: ReceiptId,
    ) -> BookkeepingResult<()> {
        self.dispatch_transaction(
            tenant_id,
            transaction_id,
            TransactionCommand::AttachReceipt(AttachReceipt {
                tenant_id,
                transaction_id,
                receipt_id,
                occurred_at: Utc::now(),
            }),
        )
        .map(drop)
    }

    fn propose(
        &self,
        tenant_id: TenantId,
        transaction_id: TransactionId,
        suggestion: Suggestion,
    ) -> BookkeepingResult<ProposedEntry> {
        self.dispatch_transaction(
            tenant_id,
            transaction_id,
            TransactionCommand::ProposeEntry(ProposeEntry {
                tenant_id,
                transaction_id,
                proposal_id: ProposalId::new(),
                suggestion,
                occurred_at: Utc::now(),
            }),
        )?;

        self.transaction(tenant_id, transaction_id)?
            .pending_proposal()
            .cloned()
            .ok_or_else(|| BookkeepingError::Internal("proposal not pending after propose".into()))
    }

    fn suggestion_input(
        &self,
        tenant_id: TenantId,
        txn: &Transaction,
        overrides: Overrides,
    ) -> BookkeepingResult<SuggestionInput> {
        let details = txn
            .details()
            .ok_or_else(|| BookkeepingError::Internal("recorded transaction without details".into()))?;

        let accounts: Vec<AccountSnapshot> = self
            .read
            .accounts
            .active(tenant_id)
            .into_iter()
            .filter(|a| a.currency == details.currency)
            .map(|a| AccountSnapshot {
                id: a.id.0,
                name: a.name,
                class: account_class(a.kind),
            })
            .collect();
        if accounts.is_empty() {
            return Err(BookkeepingError::Unavailable("chart of accounts is empty".into()));
        }

        Ok(SuggestionInput {
            transaction: TransactionSnapshot {
                id: txn.id_typed().0,
                amount: details.amount,
                date: details.date,
                description: details.description.clone(),
                merchant: details.merchant.clone(),
                category: details.category.clone(),
                is_business: details.is_business,
            },
            accounts,
            business: self.business_profile(tenant_id),
            overrides,
        })
    }

    fn enqueue_suggestion(&self, request: SuggestionRequest) {
        if let Some(queue) = &self.suggestions {
            queue.submit(request);
        }
    }

    fn transaction(&self, tenant_id: TenantId, transaction_id: TransactionId) -> BookkeepingResult<Transaction> {
        let txn = self
            .dispatcher
            .load(tenant_id, transaction_id.0, |_, id| Transaction::empty(TransactionId::new(id)))?;
        if !txn.exists() {
            return Err(DispatchError::NotFound.into());
        }
        Ok(txn)
    }

    /// An account of this tenant's chart that is not archived. Streams are
    /// tenant-scoped, so another tenant's account reads as unknown.
    fn postable_account(&self, tenant_id: TenantId, account_id: AccountId) -> BookkeepingResult<Account> {
        let account = self
            .dispatcher
            .load(tenant_id, account_id.0, |_, id| Account::empty(AccountId::new(id)))?;
        if !account.exists() {
            return Err(BookkeepingError::Validation(format!("unknown account {account_id}")));
        }
        if account.is_archived() {
            return Err(BookkeepingError::Conflict(format!("account {account_id} is archived")));
        }
        Ok(account)
    }

    fn distinct_postable(
        &self,
        tenant_id: TenantId,
        debit: AccountId,
        credit: AccountId,
    ) -> BookkeepingResult<(Account, Account)> {
        if debit == credit {
            return Err(BookkeepingError::Validation(
                "debit and credit accounts must differ".into(),
            ));
        }
        Ok((
            self.postable_account(tenant_id, debit)?,
            self.postable_account(tenant_id, credit)?,
        ))
    }

    fn dispatch_account(
        &self,
        tenant_id: TenantId,
        account_id: AccountId,
        command: AccountCommand,
    ) -> BookkeepingResult<Vec<StoredEvent>> {
        Ok(self.dispatcher.dispatch::<Account>(
            tenant_id,
            account_id.0,
            aggregate_types::ACCOUNT,
            &command,
            |_, id| Account::empty(AccountId::new(id)),
        )?)
    }

    fn dispatch_transaction(
        &self,
        tenant_id: TenantId,
        transaction_id: TransactionId,
        command: TransactionCommand,
    ) -> BookkeepingResult<Vec<StoredEvent>> {
        Ok(self.dispatcher.dispatch::<Transaction>(
            tenant_id,
            transaction_id.0,
            aggregate_types::TRANSACTION,
            &command,
            |_, id| Transaction::empty(TransactionId::new(id)),
        )?)
    }

    fn dispatch_receipt(
        &self,
        tenant_id: TenantId,
        receipt_id: ReceiptId,
        command: ReceiptCommand,
    ) -> BookkeepingResult<Vec<StoredEvent>> {
        Ok(self.dispatcher.dispatch::<Receipt>(
            tenant_id,
            receipt_id.0,
            aggregate_types::RECEIPT,
            &command,
            |_, id| Receipt::empty(ReceiptId::new(id)),
        )?)
    }
}

impl<S, B> SuggestionTarget for Bookkeeping<S, B>
where
    S: EventStore + 'static,
    B: EventBus<EventEnvelope<JsonValue>> + 'static,
{
    fn suggest(&self, request: &SuggestionRequest) -> Result<Option<ProposalId>, SuggestionError> {
        let res = self.suggest_now(request.tenant_id, request.transaction_id, request.overrides);
        match res {
            Ok(proposal) => Ok(proposal.map(|p| p.id)),
            // Deleted before the runner got to it.
            Err(BookkeepingError::Dispatch(DispatchError::NotFound)) => Ok(None),
            Err(err) if err.is_transient() => Err(SuggestionError::Transient(err.to_string())),
            Err(err) => Err(SuggestionError::Permanent(err.to_string())),
        }
    }
}

fn decode<E: serde::de::DeserializeOwned>(stored: &StoredEvent) -> Result<E, serde_json::Error> {
    serde_json::from_value(stored.payload.clone())
}

fn account_class(kind: AccountKind) -> AccountClass {
    match kind {
        AccountKind::Asset => AccountClass::Asset,
        AccountKind::Liability => AccountClass::Liability,
        AccountKind::Equity => AccountClass::Equity,
        AccountKind::Income => AccountClass::Income,
        AccountKind::Expense => AccountClass::Expense,
    }
}

fn view_snapshot(t: &TransactionView) -> TransactionSnapshot {
    TransactionSnapshot {
        id: t.id.0,
        amount: t.amount,
        date: t.date,
        description: t.description.clone(),
        merchant: t.merchant.clone(),
        category: t.category.clone(),
        is_business: t.is_business,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ezbooks_accounting::{EntrySide, ProposalStatus};
    use ezbooks_events::Subscription;

    use crate::ai::suggestion_queue;
    use crate::projections::Projection;

    type Service = InMemoryBookkeeping;

    struct Fixture {
        svc: Service,
        sub: Subscription<EventEnvelope<JsonValue>>,
        tenant_id: TenantId,
        user: UserId,
        checking: AccountId,
        card: AccountId,
        office: AccountId,
        sales: AccountId,
    }

    impl Fixture {
        fn new() -> Self {
            let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
            let sub = bus.subscribe();
            let dispatcher = CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), bus);
            let svc = Bookkeeping::new(dispatcher, Arc::new(ReadModels::new()));
            let tenant_id = TenantId::new();

            let open = |name: &str, kind| {
                svc.open_account(
                    tenant_id,
                    NewAccount {
                        name: name.to_string(),
                        kind,
                        is_business: true,
                        currency: Currency::usd(),
                        external_account_id: None,
                        opening_balance: 0,
                    },
                )
                .unwrap()
            };
            let checking = open("Business Checking", AccountKind::Asset);
            let card = open("Amex Credit Card", AccountKind::Liability);
            let office = open("Office Supplies", AccountKind::Expense);
            let sales = open("Sales Income", AccountKind::Income);

            let f = Self {
                svc,
                sub,
                tenant_id,
                user: UserId::new(),
                checking,
                card,
                office,
                sales,
            };
            f.sync();
            f
        }

        /// Feed everything published so far into the read models.
        fn sync(&self) {
            while let Ok(env) = self.sub.try_recv() {
                self.svc.read_models().apply_envelope(&env).unwrap();
            }
        }

        fn record(&self, external_id: &str, amount: i64, description: &str) -> TransactionId {
            let id = self
                .svc
                .record_transaction(
                    self.tenant_id,
                    NewTransaction {
                        account_id: self.checking,
                        external_id: Some(external_id.to_string()),
                        amount,
                        date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
                        merchant: Some("Staples".into()),
                        description: description.to_string(),
                        category: vec!["Office Supplies".into()],
                        is_pending: false,
                        is_business: true,
                        status: None,
                        source: None,
                    },
                )
                .unwrap();
            self.sync();
            id
        }
    }

    #[test]
    fn office_supplies_expense_is_suggested_approved_and_balanced() {
        let f = Fixture::new();
        let txn = f.record("ext-1", -4250, "STAPLES #1234");

        let proposal = f.svc.suggest_now(f.tenant_id, txn, Overrides::default()).unwrap().unwrap();
        assert_eq!(proposal.suggestion.debit_account_id, f.office);
        assert_eq!(proposal.suggestion.credit_account_id, f.card);
        assert_eq!(proposal.suggestion.amount, 4250);

        let entry = f
            .svc
            .approve_entry(f.tenant_id, txn, proposal.id, ProposalEdits::default(), f.user)
            .unwrap();
        f.sync();

        assert_eq!(entry.lines.len(), 2);
        assert_eq!(entry.line(EntrySide::Debit).unwrap().account_id, f.office);
        assert_eq!(entry.line(EntrySide::Credit).unwrap().account_id, f.card);

        let read = f.svc.read_models();
        assert_eq!(read.journal.list(f.tenant_id), vec![entry.clone()]);
        assert_eq!(read.balances.get(f.tenant_id, f.office).unwrap().balance, 4250);
        assert_eq!(read.balances.get(f.tenant_id, f.card).unwrap().balance, -4250);
        let p = read.proposals.get(f.tenant_id, proposal.id).unwrap();
        assert_eq!(p.status, ProposalStatus::Approved);
        assert_eq!(read.transactions.get(f.tenant_id, txn).unwrap().entry_id, Some(entry.id()));

        let again = f
            .svc
            .approve_entry(f.tenant_id, txn, proposal.id, ProposalEdits::default(), f.user);
        assert!(matches!(again, Err(BookkeepingError::Dispatch(DispatchError::Conflict(_)))));
        assert_eq!(f.svc.suggest_now(f.tenant_id, txn, Overrides::default()).unwrap(), None);
    }

    #[test]
    fn approval_refuses_archived_and_foreign_accounts() {
        let f = Fixture::new();
        let txn = f.record("ext-1", -4250, "STAPLES #1234");
        let proposal = f.svc.suggest_now(f.tenant_id, txn, Overrides::default()).unwrap().unwrap();

        let foreign = Fixture::new();
        let edits = ProposalEdits {
            credit_account_id: Some(foreign.checking),
            ..ProposalEdits::default()
        };
        let err = f.svc.approve_entry(f.tenant_id, txn, proposal.id, edits, f.user).unwrap_err();
        assert!(matches!(err, BookkeepingError::Validation(_)));

        f.svc.archive_account(f.tenant_id, f.card).unwrap();
        let err = f
            .svc
            .approve_entry(f.tenant_id, txn, proposal.id, ProposalEdits::default(), f.user)
            .unwrap_err();
        assert!(matches!(err, BookkeepingError::Conflict(_)));

        let edits = ProposalEdits {
            credit_account_id: Some(f.checking),
            ..ProposalEdits::default()
        };
        f.svc.approve_entry(f.tenant_id, txn, proposal.id, edits, f.user).unwrap();
    }

    #[test]
    fn deleting_a_transaction_removes_its_proposals_and_receipts() {
        let f = Fixture::new();
        let txn = f.record("ext-1", -4250, "STAPLES #1234");
        let first = f.svc.suggest_now(f.tenant_id, txn, Overrides::default()).unwrap().unwrap();
        f.svc.reject_entry(f.tenant_id, txn, first.id, f.user).unwrap();
        let second = f
            .svc
            .propose_entry(
                f.tenant_id,
                txn,
                ManualProposal {
                    debit_account_id: f.office,
                    credit_account_id: f.checking,
                    memo: None,
                    is_business: None,
                    explanation: None,
                },
            )
            .unwrap();
        let receipt = f
            .svc
            .capture_receipt(
                f.tenant_id,
                ReceiptFile {
                    url: "s3://receipts/1.jpg".into(),
                    storage_key: None,
                    filename: "1.jpg".into(),
                    mime_type: "image/jpeg".into(),
                    size_bytes: 1024,
                },
                Some(txn),
            )
            .unwrap();
        f.sync();
        assert_eq!(f.svc.read_models().proposals.for_transaction(f.tenant_id, txn).len(), 2);
        assert_eq!(f.svc.read_models().transactions.get(f.tenant_id, txn).unwrap().receipts, vec![receipt]);

        let discarded = f.svc.delete_transaction(f.tenant_id, txn).unwrap();
        f.sync();

        assert_eq!(discarded, vec![first.id, second.id]);
        let read = f.svc.read_models();
        assert!(read.proposals.list(f.tenant_id, None).is_empty());
        assert!(read.transactions.get(f.tenant_id, txn).is_none());
        assert!(read.receipts.get(f.tenant_id, receipt).is_none());

        let err = f.svc.reject_entry(f.tenant_id, txn, second.id, f.user).unwrap_err();
        assert!(matches!(err, BookkeepingError::Dispatch(DispatchError::NotFound)));
    }

    #[test]
    fn recording_the_same_external_id_twice_conflicts() {
        let f = Fixture::new();
        f.record("ext-1", -4250, "STAPLES #1234");
        let err = f
            .svc
            .record_transaction(
                f.tenant_id,
                NewTransaction {
                    account_id: f.checking,
                    external_id: Some(" ext-1 ".into()),
                    amount: -4250,
                    date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
                    merchant: None,
                    description: "STAPLES".into(),
                    category: vec![],
                    is_pending: false,
                    is_business: true,
                    status: None,
                    source: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, BookkeepingError::Dispatch(DispatchError::Conflict(_))));
    }

    #[test]
    fn bank_removal_skips_unknown_ids_and_rejects_pending_proposals() {
        let f = Fixture::new();
        let txn = f.record("ext-1", -4250, "STAPLES #1234");
        let proposal = f.svc.suggest_now(f.tenant_id, txn, Overrides::default()).unwrap().unwrap();

        let removed = f
            .svc
            .remove_bank_transactions(f.tenant_id, &["ext-1".into(), "nope".into(), "ext-1".into()])
            .unwrap();
        f.sync();

        assert_eq!(removed, vec![txn]);
        let read = f.svc.read_models();
        assert!(read.transactions.get(f.tenant_id, txn).unwrap().removed_at.is_some());
        assert_eq!(read.proposals.get(f.tenant_id, proposal.id).unwrap().status, ProposalStatus::Rejected);
        assert_eq!(f.svc.suggest_now(f.tenant_id, txn, Overrides::default()).unwrap(), None);
    }

    #[test]
    fn income_is_suggested_against_the_bank() {
        let f = Fixture::new();
        let txn = f.record("ext-2", 120_000, "Client payment");
        let proposal = f.svc.suggest_now(f.tenant_id, txn, Overrides::default()).unwrap().unwrap();
        assert_eq!(proposal.suggestion.debit_account_id, f.checking);
        assert_eq!(proposal.suggestion.credit_account_id, f.sales);
        assert_eq!(proposal.suggestion.confidence, 0.85);
    }

    #[test]
    fn manual_entries_are_validated_and_posted_to_the_general_ledger() {
        let f = Fixture::new();
        let entry = f
            .svc
            .post_manual_entry(
                f.tenant_id,
                NewManualEntry {
                    date: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
                    memo: Some("Owner contribution".into()),
                    debit_account_id: f.checking,
                    credit_account_id: f.sales,
                    amount: 50_000,
                    is_business: true,
                    adjustment: true,
                },
                f.user,
            )
            .unwrap();
        f.sync();

        assert_eq!(entry.header.source, EntrySource::Adjustment);
        assert_eq!(f.svc.read_models().journal.get(f.tenant_id, entry.id()), Some(entry));
        assert_eq!(f.svc.read_models().balances.get(f.tenant_id, f.checking).unwrap().balance, 50_000);

        let err = f
            .svc
            .post_manual_entry(
                f.tenant_id,
                NewManualEntry {
                    date: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
                    memo: None,
                    debit_account_id: f.checking,
                    credit_account_id: f.checking,
                    amount: 100,
                    is_business: true,
                    adjustment: false,
                },
                f.user,
            )
            .unwrap_err();
        assert!(matches!(err, BookkeepingError::Validation(_)));
    }

    #[test]
    fn duplicate_check_finds_near_identical_transactions() {
        let f = Fixture::new();
        let original = f.record("ext-1", -4250, "STAPLES #1234");
        let copy = f.record("ext-2", -4250, "STAPLES #1234");

        let m = f.svc.find_duplicate(f.tenant_id, copy).unwrap().unwrap();
        assert_eq!(m.transaction_id, original.0);
        assert_eq!(m.score, 100);
    }

    #[test]
    fn recording_and_correcting_queue_suggestions() {
        let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
        let (queue, inbox) = suggestion_queue(16);
        let svc = Bookkeeping::new(
            CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), bus),
            Arc::new(ReadModels::new()),
        )
        .with_suggestions(queue);
        let tenant_id = TenantId::new();
        let checking = svc
            .open_account(
                tenant_id,
                NewAccount {
                    name: "Checking".into(),
                    kind: AccountKind::Asset,
                    is_business: false,
                    currency: Currency::usd(),
                    external_account_id: None,
                    opening_balance: 0,
                },
            )
            .unwrap();

        let txn = svc
            .record_transaction(
                tenant_id,
                NewTransaction {
                    account_id: checking,
                    external_id: None,
                    amount: -500,
                    date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                    merchant: None,
                    description: "Coffee".into(),
                    category: vec![],
                    is_pending: false,
                    is_business: false,
                    status: None,
                    source: None,
                },
            )
            .unwrap();
        assert_eq!(inbox.try_next().map(|r| r.transaction_id), Some(txn));

        let status_only = TransactionChanges {
            status: Some(TransactionStatus::Cleared),
            ..TransactionChanges::default()
        };
        assert!(!svc.correct_transaction(tenant_id, txn, status_only).unwrap());
        assert!(inbox.try_next().is_none());

        let merchant = TransactionChanges {
            merchant: Some("Blue Bottle".into()),
            ..TransactionChanges::default()
        };
        assert!(svc.correct_transaction(tenant_id, txn, merchant).unwrap());
        assert_eq!(inbox.try_next().map(|r| r.transaction_id), Some(txn));
    }

    #[test]
    fn business_profile_is_per_tenant() {
        let f = Fixture::new();
        let other = TenantId::new();
        f.svc.set_business_profile(
            f.tenant_id,
            BusinessContext {
                business_type: Some("creator".into()),
                ..BusinessContext::default()
            },
        );
        assert_eq!(
            f.svc.business_profile(f.tenant_id).unwrap().business_type.as_deref(),
            Some("creator")
        );
        assert!(f.svc.business_profile(other).is_none());
    }
}
