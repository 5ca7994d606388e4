use std::{convert::Infallible, io, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use ezbooks_core::TenantId;
use ezbooks_events::{EventEnvelope, InMemoryEventBus};
use ezbooks_infra::{
    AppConfig, Bookkeeping, InMemoryBookkeeping,
    ai::{SuggestionRunnerHandle, suggestion_queue},
    command_dispatcher::CommandDispatcher,
    event_store::InMemoryEventStore,
    projections::{Projection, ReadModels},
    workers::{ProjectionWorker, WorkerHandle},
};

const SUGGESTION_QUEUE_CAPACITY: usize = 1024;

/// Realtime message broadcast via SSE.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub tenant_id: TenantId,
    pub topic: String,
    pub payload: JsonValue,
}

/// Everything the handlers need, shared behind an `Arc`.
pub struct AppServices {
    pub bookkeeping: Arc<InMemoryBookkeeping>,
    pub event_store: Arc<InMemoryEventStore>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
    _read_models_worker: WorkerHandle,
    _suggestion_runner: SuggestionRunnerHandle,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices").finish_non_exhaustive()
    }
}

impl AppServices {
    pub fn read_models(&self) -> &ReadModels {
        self.bookkeeping.read_models()
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }
}

/// In-memory wiring: store + bus, a worker feeding the read models (and the
/// SSE broadcast) from the bus, and the suggestion runner.
pub fn build_services(config: &AppConfig) -> io::Result<AppServices> {
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
    let read = Arc::new(ReadModels::new());

    // Lossy broadcast, tenant-filtered per SSE connection.
    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    // Subscribed before the dispatcher exists, so no committed event is missed.
    let read_models_worker = {
        let read = read.clone();
        let realtime_tx = realtime_tx.clone();
        ProjectionWorker::spawn(
            "read-models",
            bus.as_ref(),
            None,
            move |env: EventEnvelope<JsonValue>| {
                read.apply_envelope(&env)?;
                let _ = realtime_tx.send(realtime_message(&env));
                Ok::<_, ezbooks_infra::projections::ProjectionError>(())
            },
        )?
    };

    let dispatcher = CommandDispatcher::new(store.clone(), bus).with_retry(config.retry_policy());
    let (queue, inbox) = suggestion_queue(SUGGESTION_QUEUE_CAPACITY);
    let bookkeeping: Arc<InMemoryBookkeeping> = Arc::new(Bookkeeping::new(dispatcher, read).with_suggestions(queue));

    let suggestion_runner = config
        .suggestion_runner()
        .spawn("suggestions", inbox, bookkeeping.clone())?;

    tracing::info!("in-memory services started");

    Ok(AppServices {
        bookkeeping,
        event_store: store,
        realtime_tx,
        _read_models_worker: read_models_worker,
        _suggestion_runner: suggestion_runner,
    })
}

fn realtime_message(env: &EventEnvelope<JsonValue>) -> RealtimeMessage {
    // Externally tagged enums: the single key is the variant name.
    let event = env
        .payload()
        .as_object()
        .filter(|o| o.len() == 1)
        .and_then(|o| o.keys().next().cloned());

    RealtimeMessage {
        tenant_id: env.tenant_id(),
        topic: format!("{}.updated", env.aggregate_type()),
        payload: serde_json::json!({
            "aggregate_type": env.aggregate_type(),
            "aggregate_id": env.aggregate_id().to_string(),
            "sequence_number": env.sequence_number(),
            "event": event,
        }),
    }
}

pub fn tenant_sse_stream(
    services: Arc<AppServices>,
    tenant_id: TenantId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.tenant_id == tenant_id => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
