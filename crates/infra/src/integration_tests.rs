//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Command → EventStore → EventBus → ProjectionWorker → ReadModels
//!
//! Verifies:
//! - Approvals show up in the journal and balances
//! - Tenant isolation is preserved
//! - Concurrent approvals of one proposal post exactly one entry
//! - Read models rebuilt from the store match the live ones
//! - Racing writers on one stream still reach the read models in order

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier, Mutex, mpsc};
    use std::thread;
    use std::time::{Duration, Instant};

    use chrono::NaiveDate;
    use proptest::prelude::*;
    use serde_json::Value as JsonValue;

    use ezbooks_accounting::{
        AccountKind, EntrySide, ProposalEdits, ProposalStatus, ReceiptFile, TransactionId, aggregate_types,
    };
    use ezbooks_ai::Overrides;
    use ezbooks_core::{Currency, TenantId, UserId};
    use ezbooks_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};

    use crate::bookkeeping::{Bookkeeping, BookkeepingError, NewAccount, NewTransaction};
    use crate::command_dispatcher::{CommandDispatcher, DispatchError, RetryPolicy};
    use crate::event_store::InMemoryEventStore;
    use crate::projections::{Projection, ReadModels};
    use crate::workers::{ProjectionWorker, WorkerHandle};

    type Bus = InMemoryEventBus<EventEnvelope<JsonValue>>;
    type Service = Bookkeeping<Arc<InMemoryEventStore>, Arc<Bus>>;

    struct Pipeline {
        store: Arc<InMemoryEventStore>,
        svc: Arc<Service>,
        worker: Option<WorkerHandle>,
    }

    impl Drop for Pipeline {
        fn drop(&mut self) {
            if let Some(w) = self.worker.take() {
                w.shutdown();
            }
        }
    }

    fn pipeline() -> Pipeline {
        let store = Arc::new(InMemoryEventStore::new());
        let bus: Arc<Bus> = Arc::new(InMemoryEventBus::new());
        let read = Arc::new(ReadModels::new());

        let worker_read = read.clone();
        let worker = ProjectionWorker::spawn("test-read-models", bus.as_ref(), None, move |env: EventEnvelope<JsonValue>| {
            worker_read.apply_envelope(&env)
        })
        .unwrap();

        let dispatcher = CommandDispatcher::new(store.clone(), bus).with_retry(RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(1),
        });
        Pipeline {
            store,
            svc: Arc::new(Bookkeeping::new(dispatcher, read)),
            worker: Some(worker),
        }
    }

    /// Poll until the worker caught up.
    fn eventually(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !cond() {
            assert!(Instant::now() < deadline, "read models did not catch up");
            thread::sleep(Duration::from_millis(5));
        }
    }

    struct Chart {
        checking: ezbooks_accounting::AccountId,
        card: ezbooks_accounting::AccountId,
        office: ezbooks_accounting::AccountId,
    }

    fn open_chart<B>(svc: &Bookkeeping<Arc<InMemoryEventStore>, B>, tenant_id: TenantId) -> Chart
    where
        B: EventBus<EventEnvelope<JsonValue>>,
    {
        let open = |name: &str, kind| {
            svc.open_account(
                tenant_id,
                NewAccount {
                    name: name.to_string(),
                    kind,
                    is_business: true,
                    currency: Currency::usd(),
                    external_account_id: None,
                    opening_balance: 0,
                },
            )
            .unwrap()
        };
        let chart = Chart {
            checking: open("Business Checking", AccountKind::Asset),
            card: open("Business Credit Card", AccountKind::Liability),
            office: open("Office Supplies", AccountKind::Expense),
        };
        eventually(|| svc.read_models().accounts.list(tenant_id).len() == 3);
        chart
    }

    fn record<B>(
        svc: &Bookkeeping<Arc<InMemoryEventStore>, B>,
        tenant_id: TenantId,
        chart: &Chart,
        ext: &str,
        amount: i64,
    ) -> TransactionId
    where
        B: EventBus<EventEnvelope<JsonValue>>,
    {
        svc.record_transaction(
            tenant_id,
            NewTransaction {
                account_id: chart.checking,
                external_id: Some(ext.to_string()),
                amount,
                date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
                merchant: Some("Staples".into()),
                description: "STAPLES #1234".into(),
                category: vec!["Office Supplies".into()],
                is_pending: false,
                is_business: true,
                status: None,
                source: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn approval_flows_into_journal_and_balances() {
        let p = pipeline();
        let tenant_id = TenantId::new();
        let chart = open_chart(p.svc.as_ref(), tenant_id);

        let txn = record(p.svc.as_ref(), tenant_id, &chart, "ext-1", -4250);
        let proposal = p.svc.suggest_now(tenant_id, txn, Overrides::default()).unwrap().unwrap();
        let entry = p
            .svc
            .approve_entry(tenant_id, txn, proposal.id, ProposalEdits::default(), UserId::new())
            .unwrap();

        let read = p.svc.read_models();
        eventually(|| read.journal.get(tenant_id, entry.id()).is_some());
        eventually(|| read.balances.get(tenant_id, chart.card).is_some());

        assert_eq!(entry.line(EntrySide::Debit).unwrap().account_id, chart.office);
        assert_eq!(read.balances.get(tenant_id, chart.office).unwrap().balance, 4250);
        assert_eq!(read.balances.get(tenant_id, chart.card).unwrap().balance, -4250);
        assert_eq!(
            read.proposals.get(tenant_id, proposal.id).unwrap().status,
            ProposalStatus::Approved
        );
    }

    #[test]
    fn tenant_isolation_preserved() {
        let p = pipeline();
        let a = TenantId::new();
        let b = TenantId::new();
        let chart_a = open_chart(p.svc.as_ref(), a);
        let chart_b = open_chart(p.svc.as_ref(), b);

        let txn = record(p.svc.as_ref(), a, &chart_a, "ext-1", -1000);
        // Same external id, other tenant: a different stream.
        let other = record(p.svc.as_ref(), b, &chart_b, "ext-1", -2000);
        assert_ne!(txn, other);

        let read = p.svc.read_models();
        eventually(|| read.transactions.get(a, txn).is_some() && read.transactions.get(b, other).is_some());
        assert!(read.transactions.get(a, other).is_none());
        assert_eq!(read.transactions.get(b, other).unwrap().amount, -2000);

        // B cannot approve A's proposal, nor use A's accounts.
        let proposal = p.svc.suggest_now(a, txn, Overrides::default()).unwrap().unwrap();
        let err = p
            .svc
            .approve_entry(b, txn, proposal.id, ProposalEdits::default(), UserId::new())
            .unwrap_err();
        assert!(matches!(err, BookkeepingError::Dispatch(DispatchError::NotFound)));

        let edits = ProposalEdits {
            debit_account_id: Some(chart_b.office),
            ..ProposalEdits::default()
        };
        let err = p.svc.approve_entry(a, txn, proposal.id, edits, UserId::new()).unwrap_err();
        assert!(matches!(err, BookkeepingError::Validation(_)));
    }

    #[test]
    fn concurrent_approvals_post_exactly_one_entry() {
        let p = pipeline();
        let tenant_id = TenantId::new();
        let chart = open_chart(p.svc.as_ref(), tenant_id);
        let txn = record(p.svc.as_ref(), tenant_id, &chart, "ext-1", -4250);
        let proposal = p.svc.suggest_now(tenant_id, txn, Overrides::default()).unwrap().unwrap();

        let racers = 8;
        let barrier = Arc::new(Barrier::new(racers));
        let handles: Vec<_> = (0..racers)
            .map(|_| {
                let svc = p.svc.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    svc.approve_entry(tenant_id, txn, proposal.id, ProposalEdits::default(), UserId::new())
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let approved = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(approved, 1);
        for r in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(
                matches!(r, BookkeepingError::Dispatch(DispatchError::Conflict(_))),
                "unexpected error: {r:?}"
            );
        }

        let read = p.svc.read_models();
        eventually(|| read.journal.list(tenant_id).len() == 1);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(read.journal.list(tenant_id).len(), 1);
    }

    #[test]
    fn rebuilt_read_models_match_live_ones() {
        let p = pipeline();
        let tenant_id = TenantId::new();
        let chart = open_chart(p.svc.as_ref(), tenant_id);
        let user = UserId::new();

        let kept = record(p.svc.as_ref(), tenant_id, &chart, "ext-1", -4250);
        let proposal = p.svc.suggest_now(tenant_id, kept, Overrides::default()).unwrap().unwrap();
        let entry = p
            .svc
            .approve_entry(tenant_id, kept, proposal.id, ProposalEdits::default(), user)
            .unwrap();
        let deleted = record(p.svc.as_ref(), tenant_id, &chart, "ext-2", -999);
        p.svc.suggest_now(tenant_id, deleted, Overrides::default()).unwrap();
        p.svc.delete_transaction(tenant_id, deleted).unwrap();

        let live = p.svc.read_models();
        eventually(|| live.transactions.get(tenant_id, deleted).is_none() && live.journal.get(tenant_id, entry.id()).is_some());

        let rebuilt = ReadModels::new();
        let replayed = rebuilt.rebuild_tenant(p.store.as_ref(), tenant_id).unwrap();
        assert!(replayed > 0);

        assert_eq!(rebuilt.accounts.list(tenant_id), live.accounts.list(tenant_id));
        assert_eq!(rebuilt.transactions.list(tenant_id), live.transactions.list(tenant_id));
        assert_eq!(rebuilt.proposals.list(tenant_id, None), live.proposals.list(tenant_id, None));
        assert_eq!(rebuilt.journal.list(tenant_id), live.journal.list(tenant_id));
        assert_eq!(rebuilt.balances.list(tenant_id), live.balances.list(tenant_id));
        assert_eq!(rebuilt.proposals.list(tenant_id, None).len(), 1);
    }

    /// Bus that holds back one transaction event until released.
    struct GatedBus {
        inner: Bus,
        held_seq: u64,
        armed: AtomicBool,
        reached: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl EventBus<EventEnvelope<JsonValue>> for GatedBus {
        type Error = <Bus as EventBus<EventEnvelope<JsonValue>>>::Error;

        fn publish(&self, message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
            let gated = message.aggregate_type() == aggregate_types::TRANSACTION
                && message.sequence_number() == self.held_seq;
            if gated && self.armed.swap(false, Ordering::SeqCst) {
                self.reached.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            self.inner.publish(message)
        }

        fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
            self.inner.subscribe()
        }
    }

    #[test]
    fn racing_writers_on_one_stream_reach_read_models_in_order() {
        let (reached_tx, reached_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let bus = Arc::new(GatedBus {
            inner: InMemoryEventBus::new(),
            // recorded, proposed, then the receipt attachment
            held_seq: 3,
            armed: AtomicBool::new(true),
            reached: Mutex::new(reached_tx),
            release: Mutex::new(release_rx),
        });
        let store = Arc::new(InMemoryEventStore::new());
        let read = Arc::new(ReadModels::new());
        let worker_read = read.clone();
        let worker = ProjectionWorker::spawn("gated-read-models", bus.as_ref(), None, move |env: EventEnvelope<JsonValue>| {
            worker_read.apply_envelope(&env)
        })
        .unwrap();
        let svc = Arc::new(Bookkeeping::new(CommandDispatcher::new(store, bus), read.clone()));

        let tenant_id = TenantId::new();
        let chart = open_chart(svc.as_ref(), tenant_id);
        let txn = record(svc.as_ref(), tenant_id, &chart, "ext-1", -4250);
        let proposal = svc.suggest_now(tenant_id, txn, Overrides::default()).unwrap().unwrap();
        let receipt = svc
            .capture_receipt(
                tenant_id,
                ReceiptFile {
                    url: "https://files.example/r.jpg".into(),
                    storage_key: None,
                    filename: "r.jpg".into(),
                    mime_type: "image/jpeg".into(),
                    size_bytes: 1024,
                },
                None,
            )
            .unwrap();

        let linker = {
            let svc = svc.clone();
            thread::spawn(move || svc.link_receipt(tenant_id, receipt, txn))
        };
        reached_rx.recv_timeout(Duration::from_secs(3)).unwrap();

        let approver = {
            let svc = svc.clone();
            thread::spawn(move || {
                svc.approve_entry(tenant_id, txn, proposal.id, ProposalEdits::default(), UserId::new())
            })
        };
        thread::sleep(Duration::from_millis(50));
        release_tx.send(()).unwrap();

        linker.join().unwrap().unwrap();
        let entry = approver.join().unwrap().unwrap();

        eventually(|| read.journal.get(tenant_id, entry.id()).is_some());
        eventually(|| {
            read.proposals.get(tenant_id, proposal.id).map(|p| p.status) == Some(ProposalStatus::Approved)
        });
        eventually(|| !read.balances.list(tenant_id).is_empty());
        worker.shutdown();
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 16,
            ..ProptestConfig::default()
        })]

        /// Debits and credits over the whole journal always net to zero.
        #[test]
        fn journal_always_balances(
            amounts in prop::collection::vec((1i64..5_000_000, any::<bool>(), any::<bool>()), 1..8),
        ) {
            let bus: Arc<Bus> = Arc::new(InMemoryEventBus::new());
            let read = Arc::new(ReadModels::new());
            let sub = ezbooks_events::EventBus::subscribe(bus.as_ref());
            let svc: Service = Bookkeeping::new(
                CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), bus),
                read.clone(),
            );
            let tenant_id = TenantId::new();
            let chart = open_chart_sync(&svc, &sub, tenant_id);

            for (i, (amount, income, approve)) in amounts.into_iter().enumerate() {
                let signed = if income { amount } else { -amount };
                let txn = svc
                    .record_transaction(
                        tenant_id,
                        NewTransaction {
                            account_id: chart.checking,
                            external_id: Some(format!("ext-{i}")),
                            amount: signed,
                            date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
                            merchant: None,
                            description: "Payment".into(),
                            category: vec![],
                            is_pending: false,
                            is_business: true,
                            status: None,
                            source: None,
                        },
                    )
                    .unwrap();
                let proposal = svc.suggest_now(tenant_id, txn, Overrides::default()).unwrap().unwrap();
                if approve {
                    svc.approve_entry(tenant_id, txn, proposal.id, ProposalEdits::default(), UserId::new())
                        .unwrap();
                } else {
                    svc.reject_entry(tenant_id, txn, proposal.id, UserId::new()).unwrap();
                }
            }
            while let Ok(env) = sub.try_recv() {
                read.apply_envelope(&env).unwrap();
            }

            let net: i128 = read.balances.list(tenant_id).iter().map(|b| b.debits - b.credits).sum();
            prop_assert_eq!(net, 0);
            for entry in read.journal.list(tenant_id) {
                prop_assert_eq!(entry.total(EntrySide::Debit), entry.total(EntrySide::Credit));
            }
        }
    }

    fn open_chart_sync(
        svc: &Service,
        sub: &ezbooks_events::Subscription<EventEnvelope<JsonValue>>,
        tenant_id: TenantId,
    ) -> Chart {
        let open = |name: &str, kind| {
            svc.open_account(
                tenant_id,
                NewAccount {
                    name: name.to_string(),
                    kind,
                    is_business: true,
                    currency: Currency::usd(),
                    external_account_id: None,
                    opening_balance: 0,
                },
            )
            .unwrap()
        };
        let chart = Chart {
            checking: open("Business Checking", AccountKind::Asset),
            card: open("Business Credit Card", AccountKind::Liability),
            office: open("Office Supplies", AccountKind::Expense),
        };
        open("Sales Income", AccountKind::Income);
        while let Ok(env) = sub.try_recv() {
            svc.read_models().apply_envelope(&env).unwrap();
        }
        chart
    }
}
