use serde::Serialize;
use serde_json::Value as JsonValue;

use ezbooks_accounting::{
    AccountId, EntrySide, FinalEntry, LedgerEvent, TransactionEvent, aggregate_types,
};
use ezbooks_core::{Currency, TenantId};
use ezbooks_events::EventEnvelope;

use super::{Projection, ProjectionError, StreamCursors, apply_in_order};
use crate::read_model::{InMemoryTenantStore, TenantStore};

/// Read model: ledger balance of one account.
///
/// `balance` is signed debit-positive: `debits - credits`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountBalance {
    pub account_id: AccountId,
    pub currency: Currency,
    pub debits: i128,
    pub credits: i128,
    pub balance: i128,
}

/// Projection: posted entry lines → per-account balances.
#[derive(Debug)]
pub struct BalancesProjection<S = InMemoryTenantStore<AccountId, AccountBalance>> {
    store: S,
    cursors: StreamCursors,
}

impl Default for BalancesProjection {
    fn default() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> BalancesProjection<S>
where
    S: TenantStore<AccountId, AccountBalance>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, account_id: AccountId) -> Option<AccountBalance> {
        self.store.get(tenant_id, &account_id)
    }

    /// Stable order (by account id).
    pub fn list(&self, tenant_id: TenantId) -> Vec<AccountBalance> {
        let mut all = self.store.list(tenant_id);
        all.sort_by(|a, b| a.account_id.0.as_uuid().cmp(b.account_id.0.as_uuid()));
        all
    }

    fn post(&self, tenant_id: TenantId, entry: &FinalEntry) {
        for line in &entry.lines {
            self.store.update(tenant_id, line.account_id, |current| {
                let mut b = current.unwrap_or_else(|| AccountBalance {
                    account_id: line.account_id,
                    currency: line.currency.clone(),
                    debits: 0,
                    credits: 0,
                    balance: 0,
                });
                match line.side {
                    EntrySide::Debit => b.debits += line.amount as i128,
                    EntrySide::Credit => b.credits += line.amount as i128,
                }
                b.balance = b.debits - b.credits;
                Some(b)
            });
        }
    }
}

impl<S> Projection for BalancesProjection<S>
where
    S: TenantStore<AccountId, AccountBalance>,
{
    fn name(&self) -> &'static str {
        "bookkeeping.balances"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        match envelope.aggregate_type() {
            aggregate_types::TRANSACTION => {
                apply_in_order(&self.cursors, envelope, |tenant_id, ev: TransactionEvent| {
                    if let TransactionEvent::EntryApproved(e) = ev {
                        self.post(tenant_id, &e.entry);
                    }
                })
            }
            aggregate_types::LEDGER => {
                apply_in_order(&self.cursors, envelope, |tenant_id, ev: LedgerEvent| match ev {
                    LedgerEvent::ManualEntryPosted(e) => self.post(tenant_id, &e.entry),
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
