use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use ezbooks_accounting::{
    OcrFields, ReceiptEvent, ReceiptFile, ReceiptId, TransactionId, aggregate_types,
};
use ezbooks_core::TenantId;
use ezbooks_events::EventEnvelope;

use super::{Projection, ProjectionError, StreamCursors, apply_in_order};
use crate::read_model::{InMemoryTenantStore, TenantStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptView {
    pub id: ReceiptId,
    pub file: ReceiptFile,
    pub transaction_id: Option<TransactionId>,
    pub ocr: Option<OcrFields>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Projection: receipt streams → receipts. Discarded receipts are removed.
#[derive(Debug)]
pub struct ReceiptsProjection<S = InMemoryTenantStore<ReceiptId, ReceiptView>> {
    store: S,
    cursors: StreamCursors,
}

impl Default for ReceiptsProjection {
    fn default() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> ReceiptsProjection<S>
where
    S: TenantStore<ReceiptId, ReceiptView>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, id: ReceiptId) -> Option<ReceiptView> {
        self.store.get(tenant_id, &id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<ReceiptView> {
        let mut all = self.store.list(tenant_id);
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    fn apply(&self, tenant_id: TenantId, ev: ReceiptEvent) {
        match ev {
            ReceiptEvent::ReceiptCaptured(e) => self.store.upsert(
                tenant_id,
                e.receipt_id,
                ReceiptView {
                    id: e.receipt_id,
                    file: e.file,
                    transaction_id: e.transaction_id,
                    ocr: None,
                    created_at: e.occurred_at,
                    updated_at: e.occurred_at,
                },
            ),
            ReceiptEvent::OcrRecorded(e) => self.store.update(tenant_id, e.receipt_id, |r| {
                r.map(|mut r| {
                    r.ocr = Some(e.fields);
                    r.updated_at = e.occurred_at;
                    r
                })
            }),
            ReceiptEvent::ReceiptLinked(e) => self.store.update(tenant_id, e.receipt_id, |r| {
                r.map(|mut r| {
                    r.transaction_id = Some(e.transaction_id);
                    r.updated_at = e.occurred_at;
                    r
                })
            }),
            ReceiptEvent::ReceiptDiscarded(e) => {
                self.store.remove(tenant_id, &e.receipt_id);
            }
        }
    }
}

impl<S> Projection for ReceiptsProjection<S>
where
    S: TenantStore<ReceiptId, ReceiptView>,
{
    fn name(&self) -> &'static str {
        "bookkeeping.receipts"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != aggregate_types::RECEIPT {
            return Ok(());
        }
        apply_in_order(&self.cursors, envelope, |tenant_id, ev: ReceiptEvent| {
            self.apply(tenant_id, ev)
        })
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}
