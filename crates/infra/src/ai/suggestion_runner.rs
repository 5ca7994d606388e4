use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use ezbooks_accounting::TransactionId;
use ezbooks_ai::{AiError, Overrides};
use ezbooks_core::{ProposalId, TenantId};

/// Ask for a fresh suggestion for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuggestionRequest {
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub overrides: Overrides,
}

impl SuggestionRequest {
    pub fn new(tenant_id: TenantId, transaction_id: TransactionId) -> Self {
        Self {
            tenant_id,
            transaction_id,
            overrides: Overrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }
}

#[derive(Debug, Error)]
pub enum SuggestionError {
    /// Worth retrying (e.g. a concurrent write to the transaction).
    #[error("transient suggestion failure: {0}")]
    Transient(String),

    #[error("suggestion failed: {0}")]
    Permanent(String),
}

impl From<AiError> for SuggestionError {
    fn from(value: AiError) -> Self {
        if value.is_transient() {
            SuggestionError::Transient(value.to_string())
        } else {
            SuggestionError::Permanent(value.to_string())
        }
    }
}

/// Whatever turns a request into a stored proposal.
pub trait SuggestionTarget: Send + Sync + 'static {
    /// Returns the proposal written, or `None` when the transaction no longer
    /// needs one (deleted, removed, already approved).
    fn suggest(&self, request: &SuggestionRequest) -> Result<Option<ProposalId>, SuggestionError>;
}

/// Producer side of the runner's bounded request queue.
#[derive(Debug, Clone)]
pub struct SuggestionQueue {
    tx: mpsc::SyncSender<SuggestionRequest>,
}

impl SuggestionQueue {
    /// Enqueue without blocking. Returns `false` when the queue is full or
    /// the runner is gone; the caller can ask again later.
    pub fn submit(&self, request: SuggestionRequest) -> bool {
        match self.tx.try_send(request) {
            Ok(()) => true,
            Err(mpsc::TrySendError::Full(r)) => {
                warn!(
                    tenant_id = %r.tenant_id,
                    transaction_id = %r.transaction_id,
                    "suggestion queue full; request dropped"
                );
                false
            }
            Err(mpsc::TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Consumer side, handed to [`SuggestionRunner::spawn`].
#[derive(Debug)]
pub struct SuggestionInbox {
    rx: mpsc::Receiver<SuggestionRequest>,
}

impl SuggestionInbox {
    #[cfg(test)]
    pub(crate) fn try_next(&self) -> Option<SuggestionRequest> {
        self.rx.try_recv().ok()
    }
}

pub fn suggestion_queue(capacity: usize) -> (SuggestionQueue, SuggestionInbox) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (SuggestionQueue { tx }, SuggestionInbox { rx })
}

/// Config for the suggestion runner.
#[derive(Debug, Clone)]
pub struct SuggestionRunner {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for SuggestionRunner {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug)]
pub struct SuggestionRunnerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl SuggestionRunnerHandle {
    /// Stop the runner. Queued and delayed requests are dropped.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

impl SuggestionRunner {
    pub fn spawn<T>(
        &self,
        name: &'static str,
        inbox: SuggestionInbox,
        target: Arc<T>,
    ) -> io::Result<SuggestionRunnerHandle>
    where
        T: SuggestionTarget + ?Sized,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let cfg = self.clone();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || runner_loop(name, cfg, shutdown_rx, inbox, target))?;

        Ok(SuggestionRunnerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

struct Delayed {
    due: Instant,
    attempt: u32,
    request: SuggestionRequest,
}

fn runner_loop<T>(
    name: &'static str,
    cfg: SuggestionRunner,
    shutdown_rx: mpsc::Receiver<()>,
    inbox: SuggestionInbox,
    target: Arc<T>,
) where
    T: SuggestionTarget + ?Sized,
{
    info!(runner = name, "suggestion runner started");

    let tick = Duration::from_millis(50);
    let mut delayed: VecDeque<Delayed> = VecDeque::new();

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let now = Instant::now();
        if let Some(pos) = delayed.iter().position(|d| d.due <= now) {
            if let Some(d) = delayed.remove(pos) {
                run_once(name, &cfg, target.as_ref(), d.request, d.attempt, &mut delayed);
            }
            continue;
        }

        match inbox.rx.recv_timeout(tick) {
            Ok(request) => run_once(name, &cfg, target.as_ref(), request, 1, &mut delayed),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) if delayed.is_empty() => break,
            Err(mpsc::RecvTimeoutError::Disconnected) => thread::sleep(tick),
        }
    }

    info!(runner = name, "suggestion runner stopped");
}

fn run_once<T>(
    name: &'static str,
    cfg: &SuggestionRunner,
    target: &T,
    request: SuggestionRequest,
    attempt: u32,
    delayed: &mut VecDeque<Delayed>,
) where
    T: SuggestionTarget + ?Sized,
{
    match target.suggest(&request) {
        Ok(Some(proposal_id)) => debug!(
            runner = name,
            tenant_id = %request.tenant_id,
            transaction_id = %request.transaction_id,
            proposal_id = %proposal_id,
            attempt,
            "suggestion stored"
        ),
        Ok(None) => debug!(
            runner = name,
            tenant_id = %request.tenant_id,
            transaction_id = %request.transaction_id,
            "transaction no longer needs a suggestion"
        ),
        Err(SuggestionError::Transient(msg)) if attempt <= cfg.max_retries => {
            let wait = backoff(cfg.base_backoff, attempt);
            warn!(
                runner = name,
                tenant_id = %request.tenant_id,
                transaction_id = %request.transaction_id,
                attempt,
                retry_in_ms = wait.as_millis() as u64,
                error = %msg,
                "suggestion failed; retrying"
            );
            delayed.push_back(Delayed {
                due: Instant::now() + wait,
                attempt: attempt + 1,
                request,
            });
        }
        Err(err) => warn!(
            runner = name,
            tenant_id = %request.tenant_id,
            transaction_id = %request.transaction_id,
            attempt,
            error = %err,
            "suggestion abandoned"
        ),
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    // base * 2^(attempt-1), capped.
    let pow = 1u32 << attempt.saturating_sub(1).min(10);
    base.saturating_mul(pow).min(Duration::from_secs(10))
}
