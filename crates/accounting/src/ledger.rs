use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ezbooks_core::{Aggregate, AggregateRoot, DomainError, EntryId, TenantId};
use ezbooks_events::{Event, TenantScoped};

use crate::entry::{EntrySource, FinalEntry};
use crate::ids::LedgerId;

/// Aggregate root: the tenant's general ledger.
///
/// Holds postings that do not come from a transaction approval (manual
/// journal entries and adjustments). The ledger keeps only the ids it has
/// posted; balances are projected from the events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    id: LedgerId,
    tenant_id: Option<TenantId>,
    posted: HashSet<EntryId>,
    version: u64,
    created: bool,
}

impl Ledger {
    pub fn empty(id: LedgerId) -> Self {
        Self {
            id,
            tenant_id: None,
            posted: HashSet::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> LedgerId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn has_posted(&self, entry_id: EntryId) -> bool {
        self.posted.contains(&entry_id)
    }

    pub fn posted_count(&self) -> usize {
        self.posted.len()
    }
}

impl AggregateRoot for Ledger {
    type Id = LedgerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostManualEntry {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub entry: FinalEntry,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCommand {
    PostManualEntry(PostManualEntry),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualEntryPosted {
    pub tenant_id: TenantId,
    pub ledger_id: LedgerId,
    pub entry: FinalEntry,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    ManualEntryPosted(ManualEntryPosted),
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::ManualEntryPosted(_) => "accounting.ledger.manual_entry_posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::ManualEntryPosted(e) => e.occurred_at,
        }
    }
}

impl TenantScoped for LedgerEvent {
    fn tenant_id(&self) -> TenantId {
        match self {
            LedgerEvent::ManualEntryPosted(e) => e.tenant_id,
        }
    }
}

impl Aggregate for Ledger {
    type Command = LedgerCommand;
    type Event = LedgerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LedgerEvent::ManualEntryPosted(e) => {
                self.id = e.ledger_id;
                if self.tenant_id.is_none() {
                    self.tenant_id = Some(e.tenant_id);
                    self.created = true;
                }
                self.posted.insert(e.entry.id());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LedgerCommand::PostManualEntry(cmd) => self.handle_post(cmd),
        }
    }
}

impl Ledger {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn handle_post(&self, cmd: &PostManualEntry) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;

        if !matches!(
            cmd.entry.header.source,
            EntrySource::Manual | EntrySource::Adjustment
        ) {
            return Err(DomainError::validation(
                "only manual or adjustment entries can be posted directly",
            ));
        }
        if cmd.entry.header.proposal_id.is_some() {
            return Err(DomainError::validation(
                "entries from proposals are posted by approval",
            ));
        }
        if self.posted.contains(&cmd.entry.id()) {
            return Err(DomainError::conflict("entry already posted"));
        }

        cmd.entry.validate()?;

        Ok(vec![LedgerEvent::ManualEntryPosted(ManualEntryPosted {
            tenant_id: cmd.tenant_id,
            ledger_id: cmd.ledger_id,
            entry: cmd.entry.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
