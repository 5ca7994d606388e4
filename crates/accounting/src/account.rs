use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ezbooks_core::{Aggregate, AggregateRoot, Currency, DomainError, TenantId};
use ezbooks_events::{Event, TenantScoped};

use crate::entry::EntrySide;
use crate::ids::AccountId;

/// Account classification (determines the normal balance side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

impl AccountKind {
    pub fn normal_side(self) -> EntrySide {
        match self {
            AccountKind::Asset | AccountKind::Expense => EntrySide::Debit,
            AccountKind::Liability | AccountKind::Equity | AccountKind::Income => EntrySide::Credit,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccountKind::Asset => "asset",
            AccountKind::Liability => "liability",
            AccountKind::Equity => "equity",
            AccountKind::Income => "income",
            AccountKind::Expense => "expense",
        }
    }
}

impl core::str::FromStr for AccountKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asset" => Ok(AccountKind::Asset),
            "liability" => Ok(AccountKind::Liability),
            "equity" => Ok(AccountKind::Equity),
            "income" | "revenue" => Ok(AccountKind::Income),
            "expense" => Ok(AccountKind::Expense),
            other => Err(DomainError::validation(format!("unknown account kind: {other}"))),
        }
    }
}

/// Aggregate root: one chart-of-accounts entry.
///
/// Accounts are never deleted; `ArchiveAccount` hides them from new postings.
/// `balance` is the figure last reported by a bank sync, not the ledger
/// balance (that one is projected from posted entry lines).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    id: AccountId,
    tenant_id: Option<TenantId>,
    name: String,
    kind: AccountKind,
    is_business: bool,
    currency: Currency,
    external_account_id: Option<String>,
    balance: i64,
    archived: bool,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Account {
    pub fn empty(id: AccountId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            kind: AccountKind::Asset,
            is_business: false,
            currency: Currency::usd(),
            external_account_id: None,
            balance: 0,
            archived: false,
            created_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> AccountId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AccountKind {
        self.kind
    }

    pub fn is_business(&self) -> bool {
        self.is_business
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn external_account_id(&self) -> Option<&str> {
        self.external_account_id.as_deref()
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// True when the account may appear on a new proposal or posting.
    pub fn is_postable(&self) -> bool {
        self.created && !self.archived
    }
}

impl AggregateRoot for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAccount {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub name: String,
    pub kind: AccountKind,
    pub is_business: bool,
    pub currency: Currency,
    pub external_account_id: Option<String>,
    pub opening_balance: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameAccount {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkExternalAccount {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub external_account_id: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBalance {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub balance: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveAccount {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountCommand {
    OpenAccount(OpenAccount),
    RenameAccount(RenameAccount),
    LinkExternalAccount(LinkExternalAccount),
    SyncBalance(SyncBalance),
    ArchiveAccount(ArchiveAccount),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub name: String,
    pub kind: AccountKind,
    pub is_business: bool,
    pub currency: Currency,
    pub external_account_id: Option<String>,
    pub opening_balance: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRenamed {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAccountLinked {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub external_account_id: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSynced {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub balance: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountArchived {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    AccountOpened(AccountOpened),
    AccountRenamed(AccountRenamed),
    ExternalAccountLinked(ExternalAccountLinked),
    BalanceSynced(BalanceSynced),
    AccountArchived(AccountArchived),
}

impl Event for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::AccountOpened(_) => "accounting.account.opened",
            AccountEvent::AccountRenamed(_) => "accounting.account.renamed",
            AccountEvent::ExternalAccountLinked(_) => "accounting.account.external_linked",
            AccountEvent::BalanceSynced(_) => "accounting.account.balance_synced",
            AccountEvent::AccountArchived(_) => "accounting.account.archived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AccountEvent::AccountOpened(e) => e.occurred_at,
            AccountEvent::AccountRenamed(e) => e.occurred_at,
            AccountEvent::ExternalAccountLinked(e) => e.occurred_at,
            AccountEvent::BalanceSynced(e) => e.occurred_at,
            AccountEvent::AccountArchived(e) => e.occurred_at,
        }
    }
}

impl TenantScoped for AccountEvent {
    fn tenant_id(&self) -> TenantId {
        match self {
            AccountEvent::AccountOpened(e) => e.tenant_id,
            AccountEvent::AccountRenamed(e) => e.tenant_id,
            AccountEvent::ExternalAccountLinked(e) => e.tenant_id,
            AccountEvent::BalanceSynced(e) => e.tenant_id,
            AccountEvent::AccountArchived(e) => e.tenant_id,
        }
    }
}

impl Aggregate for Account {
    type Command = AccountCommand;
    type Event = AccountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AccountEvent::AccountOpened(e) => {
                self.id = e.account_id;
                self.tenant_id = Some(e.tenant_id);
                self.name = e.name.clone();
                self.kind = e.kind;
                self.is_business = e.is_business;
                self.currency = e.currency.clone();
                self.external_account_id = e.external_account_id.clone();
                self.balance = e.opening_balance;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            AccountEvent::AccountRenamed(e) => {
                self.name = e.name.clone();
            }
            AccountEvent::ExternalAccountLinked(e) => {
                self.external_account_id = Some(e.external_account_id.clone());
            }
            AccountEvent::BalanceSynced(e) => {
                self.balance = e.balance;
            }
            AccountEvent::AccountArchived(_) => {
                self.archived = true;
            }
        }

        self.updated_at = Some(Event::occurred_at(event));
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AccountCommand::OpenAccount(cmd) => self.handle_open(cmd),
            AccountCommand::RenameAccount(cmd) => self.handle_rename(cmd),
            AccountCommand::LinkExternalAccount(cmd) => self.handle_link(cmd),
            AccountCommand::SyncBalance(cmd) => self.handle_sync(cmd),
            AccountCommand::ArchiveAccount(cmd) => self.handle_archive(cmd),
        }
    }
}

impl Account {
    fn ensure_existing(&self, tenant_id: TenantId, account_id: AccountId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != account_id {
            return Err(DomainError::invariant("account_id mismatch"));
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), DomainError> {
        if self.archived {
            return Err(DomainError::conflict("account is archived"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenAccount) -> Result<Vec<AccountEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("account already exists"));
        }

        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("account name cannot be empty"));
        }

        let external_account_id = match cmd.external_account_id.as_deref().map(str::trim) {
            Some("") => {
                return Err(DomainError::validation("external_account_id cannot be empty"));
            }
            other => other.map(str::to_string),
        };

        Ok(vec![AccountEvent::AccountOpened(AccountOpened {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            name: name.to_string(),
            kind: cmd.kind,
            is_business: cmd.is_business,
            currency: cmd.currency.clone(),
            external_account_id,
            opening_balance: cmd.opening_balance,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_rename(&self, cmd: &RenameAccount) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.account_id)?;
        self.ensure_active()?;

        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("account name cannot be empty"));
        }
        if name == self.name {
            return Ok(vec![]);
        }

        Ok(vec![AccountEvent::AccountRenamed(AccountRenamed {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            name: name.to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_link(&self, cmd: &LinkExternalAccount) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.account_id)?;
        self.ensure_active()?;

        let external = cmd.external_account_id.trim();
        if external.is_empty() {
            return Err(DomainError::validation("external_account_id cannot be empty"));
        }
        match self.external_account_id.as_deref() {
            Some(current) if current == external => return Ok(vec![]),
            Some(_) => {
                return Err(DomainError::conflict(
                    "account is already linked to another external account",
                ));
            }
            None => {}
        }

        Ok(vec![AccountEvent::ExternalAccountLinked(ExternalAccountLinked {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            external_account_id: external.to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_sync(&self, cmd: &SyncBalance) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.account_id)?;

        if cmd.balance == self.balance {
            return Ok(vec![]);
        }

        Ok(vec![AccountEvent::BalanceSynced(BalanceSynced {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            balance: cmd.balance,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchiveAccount) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.account_id)?;
        if self.archived {
            return Err(DomainError::conflict("account is already archived"));
        }

        Ok(vec![AccountEvent::AccountArchived(AccountArchived {
            tenant_id: cmd.tenant_id,
            account_id: cmd.account_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
