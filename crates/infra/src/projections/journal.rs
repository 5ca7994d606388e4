use serde_json::Value as JsonValue;

use ezbooks_accounting::{
    AccountId, FinalEntry, LedgerEvent, TransactionEvent, TransactionId, aggregate_types,
};
use ezbooks_core::{EntryId, TenantId};
use ezbooks_events::EventEnvelope;

use super::{Projection, ProjectionError, StreamCursors, apply_in_order};
use crate::read_model::{InMemoryTenantStore, TenantStore};

/// Projection: approvals and manual postings → journal of final entries.
///
/// Entries are immutable and stay in the journal even when the transaction
/// they came from is later deleted.
#[derive(Debug)]
pub struct JournalProjection<S = InMemoryTenantStore<EntryId, FinalEntry>> {
    store: S,
    cursors: StreamCursors,
}

impl Default for JournalProjection {
    fn default() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> JournalProjection<S>
where
    S: TenantStore<EntryId, FinalEntry>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, id: EntryId) -> Option<FinalEntry> {
        self.store.get(tenant_id, &id)
    }

    /// Ordered by entry date, then posting time.
    pub fn list(&self, tenant_id: TenantId) -> Vec<FinalEntry> {
        let mut all = self.store.list(tenant_id);
        all.sort_by(|a, b| {
            (a.header.date, a.header.posted_at).cmp(&(b.header.date, b.header.posted_at))
        });
        all
    }

    pub fn for_account(&self, tenant_id: TenantId, account_id: AccountId) -> Vec<FinalEntry> {
        self.list(tenant_id)
            .into_iter()
            .filter(|e| e.lines.iter().any(|l| l.account_id == account_id))
            .collect()
    }

    pub fn for_transaction(&self, tenant_id: TenantId, transaction_id: TransactionId) -> Option<FinalEntry> {
        self.store
            .list(tenant_id)
            .into_iter()
            .find(|e| e.header.transaction_id == Some(transaction_id))
    }

    fn record(&self, tenant_id: TenantId, entry: FinalEntry) {
        self.store.upsert(tenant_id, entry.id(), entry);
    }
}

impl<S> Projection for JournalProjection<S>
where
    S: TenantStore<EntryId, FinalEntry>,
{
    fn name(&self) -> &'static str {
        "bookkeeping.journal"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        match envelope.aggregate_type() {
            aggregate_types::TRANSACTION => {
                apply_in_order(&self.cursors, envelope, |tenant_id, ev: TransactionEvent| {
                    if let TransactionEvent::EntryApproved(e) = ev {
                        self.record(tenant_id, e.entry);
                    }
                })
            }
            aggregate_types::LEDGER => {
                apply_in_order(&self.cursors, envelope, |tenant_id, ev: LedgerEvent| match ev {
                    LedgerEvent::ManualEntryPosted(e) => self.record(tenant_id, e.entry),
                })
            }
            _ => Ok(()),
        }
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}
