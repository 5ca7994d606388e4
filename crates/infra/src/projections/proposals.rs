use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use ezbooks_accounting::{
    ProposalStatus, ProposedEntry, TransactionEvent, TransactionId, aggregate_types,
};
use ezbooks_core::{ProposalId, TenantId};
use ezbooks_events::EventEnvelope;

use super::{Projection, ProjectionError, StreamCursors, apply_in_order};
use crate::read_model::{InMemoryTenantStore, TenantStore};

/// Projection: transaction streams → proposed entries by id.
///
/// Proposals of a deleted transaction are removed, so none is ever orphaned.
#[derive(Debug)]
pub struct ProposalsProjection<S = InMemoryTenantStore<ProposalId, ProposedEntry>> {
    store: S,
    cursors: StreamCursors,
}

impl Default for ProposalsProjection {
    fn default() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> ProposalsProjection<S>
where
    S: TenantStore<ProposalId, ProposedEntry>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, id: ProposalId) -> Option<ProposedEntry> {
        self.store.get(tenant_id, &id)
    }

    /// Newest first, optionally filtered by status.
    pub fn list(&self, tenant_id: TenantId, status: Option<ProposalStatus>) -> Vec<ProposedEntry> {
        let mut all: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|p| status.is_none_or(|s| p.status == s))
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Proposals of one transaction, oldest first.
    pub fn for_transaction(&self, tenant_id: TenantId, transaction_id: TransactionId) -> Vec<ProposedEntry> {
        let mut all: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|p| p.transaction_id == transaction_id)
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    fn apply(&self, tenant_id: TenantId, ev: TransactionEvent) {
        match ev {
            TransactionEvent::EntryProposed(e) => {
                self.store.upsert(
                    tenant_id,
                    e.proposal_id,
                    ProposedEntry {
                        id: e.proposal_id,
                        transaction_id: e.transaction_id,
                        suggestion: e.suggestion,
                        status: ProposalStatus::Pending,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                        decided_at: None,
                        decided_by: None,
                        final_entry_id: None,
                    },
                );
            }
            TransactionEvent::EntryRevised(e) => self.modify(tenant_id, e.proposal_id, e.occurred_at, |p| {
                p.suggestion = e.suggestion;
            }),
            TransactionEvent::EntryApproved(e) => self.modify(tenant_id, e.proposal_id, e.occurred_at, |p| {
                p.status = ProposalStatus::Approved;
                p.decided_at = Some(e.occurred_at);
                p.decided_by = Some(e.approved_by);
                p.final_entry_id = Some(e.entry.id());
            }),
            TransactionEvent::EntryRejected(e) => self.modify(tenant_id, e.proposal_id, e.occurred_at, |p| {
                p.status = ProposalStatus::Rejected;
                p.decided_at = Some(e.occurred_at);
                p.decided_by = Some(e.rejected_by);
            }),
            TransactionEvent::TransactionRemoved(e) => {
                for id in e.rejected_proposals {
                    self.modify(tenant_id, id, e.occurred_at, |p| {
                        p.status = ProposalStatus::Rejected;
                        p.decided_at = Some(e.occurred_at);
                    });
                }
            }
            TransactionEvent::TransactionDeleted(e) => {
                for id in &e.discarded_proposals {
                    self.store.remove(tenant_id, id);
                }
            }
            TransactionEvent::TransactionRecorded(_)
            | TransactionEvent::TransactionCorrected(_)
            | TransactionEvent::ReceiptAttached(_) => {}
        }
    }

    fn modify(
        &self,
        tenant_id: TenantId,
        id: ProposalId,
        at: DateTime<Utc>,
        f: impl FnOnce(&mut ProposedEntry),
    ) {
        if let Some(mut p) = self.store.get(tenant_id, &id) {
            f(&mut p);
            p.updated_at = at;
            self.store.upsert(tenant_id, id, p);
        }
    }
}

impl<S> Projection for ProposalsProjection<S>
where
    S: TenantStore<ProposalId, ProposedEntry>,
{
    fn name(&self) -> &'static str {
        "bookkeeping.proposals"
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
