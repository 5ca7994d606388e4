use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use ezbooks_accounting::{AccountEvent, AccountId, AccountKind, aggregate_types};
use ezbooks_core::{Currency, TenantId};
use ezbooks_events::EventEnvelope;

use super::{Projection, ProjectionError, StreamCursors, apply_in_order};
use crate::read_model::{InMemoryTenantStore, TenantStore};

/// Read model: one chart-of-accounts row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountView {
    pub id: AccountId,
    pub name: String,
    pub kind: AccountKind,
    pub is_business: bool,
    pub currency: Currency,
    pub external_account_id: Option<String>,
    /// Last balance reported by the bank, not the ledger balance.
    pub synced_balance: i64,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Projection: account streams → chart of accounts.
#[derive(Debug)]
pub struct AccountsProjection<S = InMemoryTenantStore<AccountId, AccountView>> {
    store: S,
    cursors: StreamCursors,
}

impl Default for AccountsProjection {
    fn default() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> AccountsProjection<S>
where
    S: TenantStore<AccountId, AccountView>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, id: AccountId) -> Option<AccountView> {
        self.store.get(tenant_id, &id)
    }

    /// All accounts of a tenant, archived included, ordered by kind then name.
    pub fn list(&self, tenant_id: TenantId) -> Vec<AccountView> {
        let mut all = self.store.list(tenant_id);
        all.sort_by(|a, b| {
            (a.kind.as_str(), a.name.to_lowercase()).cmp(&(b.kind.as_str(), b.name.to_lowercase()))
        });
        all
    }

    /// Accounts that may appear on new proposals and postings.
    pub fn active(&self, tenant_id: TenantId) -> Vec<AccountView> {
        self.list(tenant_id).into_iter().filter(|a| !a.archived).collect()
    }

    pub fn find_by_external(&self, tenant_id: TenantId, external_account_id: &str) -> Option<AccountView> {
        self.store
            .list(tenant_id)
            .into_iter()
            .find(|a| a.external_account_id.as_deref() == Some(external_account_id))
    }

    fn apply(&self, tenant_id: TenantId, ev: AccountEvent) {
        match ev {
            AccountEvent::AccountOpened(e) => {
                self.store.upsert(
                    tenant_id,
                    e.account_id,
                    AccountView {
                        id: e.account_id,
                        name: e.name,
                        kind: e.kind,
                        is_business: e.is_business,
                        currency: e.currency,
                        external_account_id: e.external_account_id,
                        synced_balance: e.opening_balance,
                        archived: false,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                    },
                );
            }
            AccountEvent::AccountRenamed(e) => self.modify(tenant_id, e.account_id, e.occurred_at, |a| {
                a.name = e.name;
            }),
            AccountEvent::ExternalAccountLinked(e) => {
                self.modify(tenant_id, e.account_id, e.occurred_at, |a| {
                    a.external_account_id = Some(e.external_account_id);
                })
            }
            AccountEvent::BalanceSynced(e) => self.modify(tenant_id, e.account_id, e.occurred_at, |a| {
                a.synced_balance = e.balance;
            }),
            AccountEvent::AccountArchived(e) => self.modify(tenant_id, e.account_id, e.occurred_at, |a| {
                a.archived = true;
            }),
        }
    }

    fn modify(
        &self,
        tenant_id: TenantId,
        id: AccountId,
        at: DateTime<Utc>,
        f: impl FnOnce(&mut AccountView),
    ) {
        if let Some(mut view) = self.store.get(tenant_id, &id) {
            f(&mut view);
            view.updated_at = at;
            self.store.upsert(tenant_id, id, view);
        }
    }
}

impl<S> Projection for AccountsProjection<S>
where
    S: TenantStore<AccountId, AccountView>,
{
    fn name(&self) -> &'static str {
        "bookkeeping.accounts"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != aggregate_types::ACCOUNT {
            return Ok(());
        }
        apply_in_order(&self.cursors, envelope, |tenant_id, ev: AccountEvent| {
            self.apply(tenant_id, ev)
        })
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}
