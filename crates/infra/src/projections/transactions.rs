use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use ezbooks_accounting::{
    AccountId, ReceiptId, StatusTimestamps, TransactionEvent, TransactionId, TransactionSource,
    TransactionStatus, aggregate_types,
};
use ezbooks_core::{Currency, EntryId, TenantId};
use ezbooks_events::EventEnvelope;

use super::{Projection, ProjectionError, StreamCursors, apply_in_order};
use crate::read_model::{InMemoryTenantStore, TenantStore};

/// Read model: one raw transaction as shown in the review queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionView {
    pub id: TransactionId,
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
    pub receipts: Vec<ReceiptId>,
    #[serde(flatten)]
    pub timestamps: StatusTimestamps,
    pub removed_at: Option<DateTime<Utc>>,
    /// Set once a proposal was approved.
    pub entry_id: Option<EntryId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Projection: transaction streams → transactions. Deleted transactions are
/// removed.
#[derive(Debug)]
pub struct TransactionsProjection<S = InMemoryTenantStore<TransactionId, TransactionView>> {
    store: S,
    cursors: StreamCursors,
}

impl Default for TransactionsProjection {
    fn default() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> TransactionsProjection<S>
where
    S: TenantStore<TransactionId, TransactionView>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, id: TransactionId) -> Option<TransactionView> {
        self.store.get(tenant_id, &id)
    }

    /// Newest first.
    pub fn list(&self, tenant_id: TenantId) -> Vec<TransactionView> {
        let mut all = self.store.list(tenant_id);
        all.sort_by(|a, b| (b.date, b.created_at).cmp(&(a.date, a.created_at)));
        all
    }

    fn apply(&self, tenant_id: TenantId, ev: TransactionEvent) {
        match ev {
            TransactionEvent::TransactionRecorded(e) => {
                let d = e.details;
                let mut timestamps = StatusTimestamps::default();
                match d.status {
                    TransactionStatus::Posted => timestamps.posted_at = Some(e.occurred_at),
                    TransactionStatus::Cleared => timestamps.cleared_at = Some(e.occurred_at),
                    TransactionStatus::Reconciled => timestamps.reconciled_at = Some(e.occurred_at),
                    TransactionStatus::Pending => {}
                }
                self.store.upsert(
                    tenant_id,
                    e.transaction_id,
                    TransactionView {
                        id: e.transaction_id,
                        account_id: d.account_id,
                        external_id: d.external_id,
                        amount: d.amount,
                        currency: d.currency,
                        date: d.date,
                        merchant: d.merchant,
                        description: d.description,
                        category: d.category,
                        is_pending: d.is_pending,
                        is_business: d.is_business,
                        status: d.status,
                        source: d.source,
                        receipts: Vec::new(),
                        timestamps,
                        removed_at: None,
                        entry_id: None,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                    },
                );
            }
            TransactionEvent::TransactionCorrected(e) => {
                self.modify(tenant_id, e.transaction_id, e.occurred_at, |t| {
                    let c = e.changes;
                    if let Some(v) = c.description {
                        t.description = v;
                    }
                    if let Some(v) = c.merchant {
                        t.merchant = Some(v);
                    }
                    if let Some(v) = c.category {
                        t.category = v;
                    }
                    if let Some(v) = c.amount {
                        t.amount = v;
                    }
                    if let Some(v) = c.date {
                        t.date = v;
                    }
                    if let Some(v) = c.is_business {
                        t.is_business = v;
                    }
                    if let Some(v) = c.is_pending {
                        t.is_pending = v;
                    }
                    if let Some(v) = c.status {
                        t.status = v;
                        let slot = match v {
                            TransactionStatus::Posted => &mut t.timestamps.posted_at,
                            TransactionStatus::Cleared => &mut t.timestamps.cleared_at,
                            TransactionStatus::Reconciled => &mut t.timestamps.reconciled_at,
                            TransactionStatus::Pending => return,
                        };
                        slot.get_or_insert(e.occurred_at);
                    }
                })
            }
            TransactionEvent::ReceiptAttached(e) => {
                self.modify(tenant_id, e.transaction_id, e.occurred_at, |t| {
                    if !t.receipts.contains(&e.receipt_id) {
                        t.receipts.push(e.receipt_id);
                    }
                })
            }
            TransactionEvent::TransactionRemoved(e) => {
                self.modify(tenant_id, e.transaction_id, e.occurred_at, |t| {
                    t.removed_at = Some(e.occurred_at);
                })
            }
            TransactionEvent::EntryApproved(e) => {
                self.modify(tenant_id, e.transaction_id, e.occurred_at, |t| {
                    t.entry_id = Some(e.entry.id());
                })
            }
            TransactionEvent::EntryProposed(e) => {
                self.modify(tenant_id, e.transaction_id, e.occurred_at, |_| {})
            }
            TransactionEvent::EntryRevised(e) => {
                self.modify(tenant_id, e.transaction_id, e.occurred_at, |_| {})
            }
            TransactionEvent::EntryRejected(e) => {
                self.modify(tenant_id, e.transaction_id, e.occurred_at, |_| {})
            }
            TransactionEvent::TransactionDeleted(e) => {
                self.store.remove(tenant_id, &e.transaction_id);
            }
        }
    }

    fn modify(
        &self,
        tenant_id: TenantId,
        id: TransactionId,
        at: DateTime<Utc>,
        f: impl FnOnce(&mut TransactionView),
    ) {
        if let Some(mut view) = self.store.get(tenant_id, &id) {
            f(&mut view);
            view.updated_at = at;
            self.store.upsert(tenant_id, id, view);
        }
    }
}

impl<S> Projection for TransactionsProjection<S>
where
    S: TenantStore<TransactionId, TransactionView>,
{
    fn name(&self) -> &'static str {
        "bookkeeping.transactions"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != aggregate_types::TRANSACTION {
            return Ok(());
        }
        apply_in_order(&self.cursors, envelope, |tenant_id, ev: TransactionEvent| {
            self.apply(tenant_id, ev)
        })
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}
