//! Projection implementations (read model builders).
//!
//! Projections consume committed event envelopes and build query-optimized
//! read models. All projections are:
//! - **Rebuildable**: cleared and replayed from the event store per tenant
//! - **Tenant-isolated**: every record is keyed by tenant
//! - **Idempotent**: per-stream cursors skip redelivered envelopes

pub mod accounts;
pub mod balances;
pub mod cursor;
pub mod journal;
pub mod proposals;
pub mod receipts;
pub mod transactions;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use ezbooks_core::TenantId;
use ezbooks_events::{EventEnvelope, TenantScoped};

use crate::event_store::{EventStore, EventStoreError};

pub use accounts::{AccountView, AccountsProjection};
pub use balances::{AccountBalance, BalancesProjection};
pub use cursor::StreamCursors;
pub use journal::JournalProjection;
pub use proposals::ProposalsProjection;
pub use receipts::{ReceiptView, ReceiptsProjection};
pub use transactions::{TransactionView, TransactionsProjection};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error(transparent)]
    Store(#[from] EventStoreError),
}

/// A read model fed by committed envelopes.
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Apply one envelope. Envelopes of unrelated aggregate types are ignored.
    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError>;

    /// Drop all records and cursors of a tenant.
    fn clear_tenant(&self, tenant_id: TenantId);
}

/// Clear `projection` for `tenant_id` and replay the tenant's events.
///
/// Returns the number of envelopes replayed.
pub fn rebuild<P, S>(projection: &P, store: &S, tenant_id: TenantId) -> Result<usize, ProjectionError>
where
    P: Projection + ?Sized,
    S: EventStore + ?Sized,
{
    let events = store.load_tenant(tenant_id)?;
    projection.clear_tenant(tenant_id);
    for stored in &events {
        projection.apply_envelope(&stored.to_envelope())?;
    }
    Ok(events.len())
}

/// Cursor check, decode and tenant check around `apply`; advances the cursor
/// only after `apply` ran.
pub(crate) fn apply_in_order<E>(
    cursors: &StreamCursors,
    envelope: &EventEnvelope<JsonValue>,
    apply: impl FnOnce(TenantId, E),
) -> Result<(), ProjectionError>
where
    E: DeserializeOwned + TenantScoped,
{
    let tenant_id = envelope.tenant_id();
    let aggregate_id = envelope.aggregate_id();
    let seq = envelope.sequence_number();

    if !cursors.admit(tenant_id, aggregate_id, seq)? {
        return Ok(());
    }

    let ev: E = serde_json::from_value(envelope.payload().clone())
        .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

    if TenantScoped::tenant_id(&ev) != tenant_id {
        return Err(ProjectionError::TenantIsolation(
            "event tenant_id does not match envelope tenant_id".to_string(),
        ));
    }

    apply(tenant_id, ev);
    cursors.advance(tenant_id, aggregate_id, seq);
    Ok(())
}

/// Every read model of the bookkeeping app behind one subscription.
#[derive(Debug, Default)]
pub struct ReadModels {
    pub accounts: AccountsProjection,
    pub transactions: TransactionsProjection,
    pub proposals: ProposalsProjection,
    pub journal: JournalProjection,
    pub balances: BalancesProjection,
    pub receipts: ReceiptsProjection,
}

impl ReadModels {
    pub fn new() -> Self {
        Self::default()
    }

    fn all(&self) -> [&dyn Projection; 6] {
        [
            &self.accounts,
            &self.transactions,
            &self.proposals,
            &self.journal,
            &self.balances,
            &self.receipts,
        ]
    }

    /// Rebuild every read model of `tenant_id` from the store.
    pub fn rebuild_tenant<S>(&self, store: &S, tenant_id: TenantId) -> Result<usize, ProjectionError>
    where
        S: EventStore + ?Sized,
    {
        rebuild(self, store, tenant_id)
    }
}

impl Projection for ReadModels {
    fn name(&self) -> &'static str {
        "bookkeeping.read_models"
    }

    /// Feeds every projection even if one of them fails; the first error is
    /// returned.
    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let mut first_err = None;
        for p in self.all() {
            if let Err(err) = p.apply_envelope(envelope) {
                tracing::warn!(
                    projection = p.name(),
                    tenant_id = %envelope.tenant_id(),
                    aggregate_id = %envelope.aggregate_id(),
                    sequence_number = envelope.sequence_number(),
                    error = %err,
                    "projection failed to apply envelope"
                );
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        for p in self.all() {
            p.clear_tenant(tenant_id);
        }
    }
}
