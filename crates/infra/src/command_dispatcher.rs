//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the stream (tenant-scoped)
//!   ↓
//! 2. Rehydrate the aggregate
//!   ↓
//! 3. Handle the command (pure, produces events)
//!   ↓
//! 4. Append with ExpectedVersion::Exact(loaded version)
//!   ↓
//! 5. Publish the committed events
//! ```
//!
//! Steps 4 and 5 run under one lock, so subscribers see every stream in
//! sequence order even when two writers race on it.
//!
//! Step 4 is the only write. If another writer appended in between, the
//! append fails with [`DispatchError::Concurrency`] and the whole pipeline is
//! retried against the fresh stream. A retry re-runs the aggregate's own
//! guards, so a proposal that a concurrent request already approved comes
//! back as [`DispatchError::Conflict`] instead of being posted twice.

use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use ezbooks_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId};
use ezbooks_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Stale aggregate version at append time. Retryable.
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    /// The command is not allowed in the aggregate's current state.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    /// A stored payload no longer matches the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    /// Publication failed after a successful append. The events are durable;
    /// consumers catch up on rebuild.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Concurrency(_))
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::Unauthorized => DispatchError::Unauthorized,
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Bounded exponential backoff for [`DispatchError::Concurrency`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. `1` disables retries.
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at 2 seconds.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(10);
        self.base_backoff
            .saturating_mul(factor)
            .min(Duration::from_secs(2))
    }
}

/// Runs commands against event-sourced aggregates.
///
/// `S` is the event store, `B` the bus committed events are published on.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    retry: RetryPolicy,
    /// Held from append through publish.
    commit: Mutex<()>,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            retry: RetryPolicy::default(),
            commit: Mutex::new(()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Execute `command` against the aggregate stream, retrying on stale
    /// versions per the configured [`RetryPolicy`].
    ///
    /// Returns the committed events; empty when the command was a no-op.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: impl Fn(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: ezbooks_events::Event + Serialize + DeserializeOwned,
    {
        let mut attempt = 1;
        loop {
            match self.dispatch_once(tenant_id, aggregate_id, aggregate_type, command, &make_aggregate) {
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        tenant_id = %tenant_id,
                        aggregate_id = %aggregate_id,
                        aggregate_type,
                        attempt,
                        error = %err,
                        "stale aggregate version; retrying command"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Rehydrate an aggregate without executing anything.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl Fn(TenantId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    fn dispatch_once<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: &impl Fn(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: ezbooks_events::Event + Serialize + DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history(&mut aggregate, &history)?;

        let decided = aggregate.handle(command)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type,
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let _commit = self.commit.lock().unwrap_or_else(PoisonError::into_inner);
        let committed = self.store.append(uncommitted, expected)?;

        for stored in &committed {
            debug!(
                tenant_id = %tenant_id,
                aggregate_id = %aggregate_id,
                event_type = %stored.event_type,
                sequence_number = stored.sequence_number,
                "event committed"
            );
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

/// Reject streams a faulty backend might return: foreign tenants or
/// aggregates, zero or non-increasing sequence numbers.
fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::{NaiveDate, Utc};
    use ezbooks_accounting::{
        AccountId, ApproveEntry, ProposalEdits, ProposalSource, ProposeEntry, RecordTransaction,
        Suggestion, Transaction, TransactionCommand, TransactionDetails, TransactionId,
        TransactionSource, TransactionStatus, aggregate_types,
    };
    use ezbooks_core::{Currency, EntryId, ProposalId, UserId};
    use ezbooks_events::InMemoryEventBus;

    use crate::event_store::InMemoryEventStore;

    type Dispatcher =
        CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> Dispatcher {
        CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new()))
    }

    fn make_txn(_: TenantId, id: AggregateId) -> Transaction {
        Transaction::empty(TransactionId::new(id))
    }

    fn record(tenant_id: TenantId, transaction_id: TransactionId, bank: AccountId) -> TransactionCommand {
        TransactionCommand::RecordTransaction(RecordTransaction {
            tenant_id,
            transaction_id,
            details: TransactionDetails {
                account_id: bank,
                external_id: None,
                amount: -4250,
                currency: Currency::usd(),
                date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
                merchant: Some("Staples".into()),
                description: "Office supplies".into(),
                category: vec![],
                is_pending: false,
                is_business: true,
                status: TransactionStatus::Posted,
                source: TransactionSource::Manual,
            },
            occurred_at: Utc::now(),
        })
    }

    fn propose(
        tenant_id: TenantId,
        transaction_id: TransactionId,
        pid: ProposalId,
        (office, bank): (AccountId, AccountId),
    ) -> TransactionCommand {
        TransactionCommand::ProposeEntry(ProposeEntry {
            tenant_id,
            transaction_id,
            proposal_id: pid,
            suggestion: Suggestion {
                debit_account_id: office,
                credit_account_id: bank,
                amount: 4250,
                currency: Currency::usd(),
                confidence: 0.8,
                explanation: "Expense".into(),
                memo: None,
                is_business: true,
                source: ProposalSource::AiModel,
                alternatives: vec![],
            },
            occurred_at: Utc::now(),
        })
    }

    fn approve(
        tenant_id: TenantId,
        transaction_id: TransactionId,
        pid: ProposalId,
        (office, bank): (AccountId, AccountId),
    ) -> TransactionCommand {
        TransactionCommand::ApproveEntry(ApproveEntry {
            tenant_id,
            transaction_id,
            proposal_id: pid,
            entry_id: EntryId::new(),
            edits: ProposalEdits::default(),
            debit_account_id: office,
            credit_account_id: bank,
            approved_by: UserId::new(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn committed_events_are_published_after_append() {
        let d = dispatcher();
        let sub = d.bus().subscribe();
        let tenant_id = TenantId::new();
        let txn_id = TransactionId::generate();

        let committed = d
            .dispatch::<Transaction>(
                tenant_id,
                txn_id.0,
                aggregate_types::TRANSACTION,
                &record(tenant_id, txn_id, AccountId::generate()),
                make_txn,
            )
            .unwrap();

        assert_eq!(committed.len(), 1);
        let env = sub.try_recv().unwrap();
        assert_eq!(env.sequence_number(), 1);
        assert_eq!(env.aggregate_type(), aggregate_types::TRANSACTION);
    }

    #[test]
    fn second_approval_is_a_conflict_not_a_second_posting() {
        let d = dispatcher();
        let tenant_id = TenantId::new();
        let txn_id = TransactionId::generate();
        let bank = AccountId::generate();
        let accounts = (AccountId::generate(), bank);
        let pid = ProposalId::new();

        for cmd in [record(tenant_id, txn_id, bank), propose(tenant_id, txn_id, pid, accounts)] {
            d.dispatch::<Transaction>(tenant_id, txn_id.0, aggregate_types::TRANSACTION, &cmd, make_txn)
                .unwrap();
        }

        let first = d.dispatch::<Transaction>(
            tenant_id,
            txn_id.0,
            aggregate_types::TRANSACTION,
            &approve(tenant_id, txn_id, pid, accounts),
            make_txn,
        );
        assert_eq!(first.unwrap().len(), 1);

        let second = d.dispatch::<Transaction>(
            tenant_id,
            txn_id.0,
            aggregate_types::TRANSACTION,
            &approve(tenant_id, txn_id, pid, accounts),
            make_txn,
        );
        assert!(matches!(second, Err(DispatchError::Conflict(_))));
    }

    /// Store that, once armed, sneaks a competing approval in ahead of the
    /// next append so the dispatcher's expected version is stale exactly once.
    struct RacingStore {
        inner: InMemoryEventStore,
        armed: AtomicBool,
        interloper: TransactionCommand,
    }

    impl EventStore for RacingStore {
        fn append(
            &self,
            events: Vec<UncommittedEvent>,
            expected_version: ExpectedVersion,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                let first = &events[0];
                let mut txn = Transaction::empty(TransactionId::new(first.aggregate_id));
                for stored in self.inner.load_stream(first.tenant_id, first.aggregate_id)? {
                    txn.apply(&serde_json::from_value(stored.payload).unwrap());
                }
                let racing = txn
                    .handle(&self.interloper)
                    .unwrap()
                    .iter()
                    .map(|ev| {
                        UncommittedEvent::from_typed(
                            first.tenant_id,
                            first.aggregate_id,
                            first.aggregate_type.clone(),
                            Uuid::now_v7(),
                            ev,
                        )
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                self.inner.append(racing, ExpectedVersion::Any)?;
            }
            self.inner.append(events, expected_version)
        }

        fn load_stream(
            &self,
            tenant_id: TenantId,
            aggregate_id: AggregateId,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_stream(tenant_id, aggregate_id)
        }

        fn load_tenant(&self, tenant_id: TenantId) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_tenant(tenant_id)
        }
    }

    #[test]
    fn racing_approval_is_retried_and_then_refused() {
        let tenant_id = TenantId::new();
        let txn_id = TransactionId::generate();
        let bank = AccountId::generate();
        let accounts = (AccountId::generate(), bank);
        let pid = ProposalId::new();

        let store = RacingStore {
            inner: InMemoryEventStore::new(),
            armed: AtomicBool::new(false),
            interloper: approve(tenant_id, txn_id, pid, accounts),
        };
        let d = CommandDispatcher::new(store, InMemoryEventBus::<EventEnvelope<JsonValue>>::new()).with_retry(RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
        });
        for cmd in [record(tenant_id, txn_id, bank), propose(tenant_id, txn_id, pid, accounts)] {
            d.dispatch::<Transaction>(tenant_id, txn_id.0, aggregate_types::TRANSACTION, &cmd, make_txn)
                .unwrap();
        }

        d.store().armed.store(true, Ordering::SeqCst);
        let result = d.dispatch::<Transaction>(
            tenant_id,
            txn_id.0,
            aggregate_types::TRANSACTION,
            &approve(tenant_id, txn_id, pid, accounts),
            make_txn,
        );

        assert!(matches!(result, Err(DispatchError::Conflict(_))));
        let approvals = d
            .store()
            .load_stream(tenant_id, txn_id.0)
            .unwrap()
            .iter()
            .filter(|e| e.event_type == "accounting.transaction.entry_approved")
            .count();
        assert_eq!(approvals, 1);
    }

    #[test]
    fn revision_racing_an_approval_turns_the_retry_into_a_conflict() {
        let tenant_id = TenantId::new();
        let txn_id = TransactionId::generate();
        let bank = AccountId::generate();
        let reviewed = (AccountId::generate(), bank);
        let pid = ProposalId::new();

        let store = RacingStore {
            inner: InMemoryEventStore::new(),
            armed: AtomicBool::new(false),
            interloper: propose(tenant_id, txn_id, ProposalId::new(), (AccountId::generate(), bank)),
        };
        let d = CommandDispatcher::new(store, InMemoryEventBus::<EventEnvelope<JsonValue>>::new()).with_retry(RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
        });
        for cmd in [record(tenant_id, txn_id, bank), propose(tenant_id, txn_id, pid, reviewed)] {
            d.dispatch::<Transaction>(tenant_id, txn_id.0, aggregate_types::TRANSACTION, &cmd, make_txn)
                .unwrap();
        }

        d.store().armed.store(true, Ordering::SeqCst);
        let result = d.dispatch::<Transaction>(
            tenant_id,
            txn_id.0,
            aggregate_types::TRANSACTION,
            &approve(tenant_id, txn_id, pid, reviewed),
            make_txn,
        );

        assert!(matches!(result, Err(DispatchError::Conflict(_))));
        let stream = d.store().load_stream(tenant_id, txn_id.0).unwrap();
        assert!(stream.iter().all(|e| e.event_type != "accounting.transaction.entry_approved"));
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let p = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(25),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(25));
        assert_eq!(p.backoff(3), Duration::from_millis(100));
        assert_eq!(p.backoff(30), Duration::from_secs(2));
    }
}
