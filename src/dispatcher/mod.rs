//! Accrual reconciliation dispatcher.
//!
//! A single background task pops jobs, asks the oracle about each order,
//! lets the reconciler decide, and executes the decision against the ledger.
//! Jobs that must come back later are re-inserted into the same delay queue,
//! so retries never spawn tasks of their own.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::ledger::{Ledger, LedgerError};
use crate::model::{OrderNumber, ReconciliationJob, UserId};
use crate::oracle::AccrualOracle;
use crate::reconciler::{DropReason, ReconcileAction, reconcile};

mod error;
pub use error::SubmitError;

/// Counters reported when the dispatcher stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Orders settled as `PROCESSED` and credited.
    pub processed: u64,
    /// Orders settled as `INVALID`.
    pub invalid: u64,
    pub dropped: u64,
    /// Jobs still queued or delayed when cancellation fired.
    pub abandoned: u64,
    /// Submissions ignored because the order was already tracked.
    pub duplicates: u64,
}

/// Cloneable submission side of a [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    sender: mpsc::UnboundedSender<ReconciliationJob>,
    cancel: CancellationToken,
}

impl DispatcherHandle {
    /// Enqueue an order for reconciliation. Never blocks.
    pub fn submit(&self, user: UserId, order: OrderNumber) -> Result<(), SubmitError> {
        if self.cancel.is_cancelled() {
            return Err(SubmitError::ShuttingDown);
        }
        self.sender
            .send(ReconciliationJob::new(user, order, self.cancel.clone()))
            .map_err(|_| SubmitError::Closed)
    }
}

/// The reconciliation loop. Drive it with [`Dispatcher::run`].
pub struct Dispatcher<O, L> {
    config: DispatcherConfig,
    oracle: O,
    ledger: Arc<L>,
    cancel: CancellationToken,
    inbox: mpsc::UnboundedReceiver<ReconciliationJob>,
    inbox_closed: bool,
    ready: VecDeque<ReconciliationJob>,
    delayed: DelayQueue<ReconciliationJob>,
    /// Orders with a job queued, delayed or in flight.
    tracked: HashSet<OrderNumber>,
    last_request: Option<Instant>,
    stats: DispatchStats,
}

/// Public API
impl<O, L> Dispatcher<O, L>
where
    O: AccrualOracle,
    L: Ledger,
{
    pub fn new(
        config: DispatcherConfig,
        oracle: O,
        ledger: Arc<L>,
        cancel: CancellationToken,
    ) -> (Self, DispatcherHandle) {
        let (sender, inbox) = mpsc::unbounded_channel();
        let handle = DispatcherHandle {
            sender,
            cancel: cancel.clone(),
        };
        let dispatcher = Self {
            config,
            oracle,
            ledger,
            cancel,
            inbox,
            inbox_closed: false,
            ready: VecDeque::new(),
            delayed: DelayQueue::new(),
            tracked: HashSet::new(),
            last_request: None,
            stats: DispatchStats::default(),
        };
        (dispatcher, handle)
    }

    /// Run until cancelled, or until every handle is dropped and no job is left.
    pub async fn run(mut self) -> DispatchStats {
        info!("accrual dispatcher started");

        while let Some(job) = self.next_job().await {
            self.process(job).await;
        }

        self.shutdown();
        self.stats
    }
}

/// Private API
impl<O, L> Dispatcher<O, L>
where
    O: AccrualOracle,
    L: Ledger,
{
    async fn next_job(&mut self) -> Option<ReconciliationJob> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            if let Some(job) = self.ready.pop_front() {
                return Some(job);
            }
            if self.inbox_closed && self.delayed.is_empty() {
                return None;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                Some(expired) = self.delayed.next(), if !self.delayed.is_empty() => {
                    self.ready.push_back(expired.into_inner());
                }
                received = self.inbox.recv(), if !self.inbox_closed => match received {
                    Some(job) => self.accept(job),
                    None => self.inbox_closed = true,
                },
            }
        }
    }

    /// Admit a new submission unless the same order is already tracked.
    fn accept(&mut self, job: ReconciliationJob) {
        if !self.tracked.insert(job.order.clone()) {
            warn!(
                order = %job.order,
                user = job.user,
                "order already being reconciled, submission ignored"
            );
            self.stats.duplicates += 1;
            return;
        }
        debug!(order = %job.order, user = job.user, "job queued");
        self.ready.push_back(job);
    }

    async fn process(&mut self, job: ReconciliationJob) {
        let not_before = self
            .last_request
            .map(|last| last + self.config.min_request_interval);
        if !pace(&self.cancel, not_before).await {
            self.abandon(job);
            return;
        }

        self.last_request = Some(Instant::now());
        let outcome = self.oracle.lookup(&job.order).await;
        debug!(order = %job.order, outcome = ?outcome, "oracle lookup finished");

        let action = reconcile(&job, outcome, &self.config.retry);
        self.execute(job, action).await;
    }

    async fn execute(&mut self, job: ReconciliationJob, action: ReconcileAction) {
        match action {
            ReconcileAction::Requeue {
                delay,
                status,
                attempts,
            } => {
                if let Some(status) = status {
                    match self.ledger.update_order_status(&job.order, status).await {
                        Ok(()) => debug!(order = %job.order, status = %status, "status persisted"),
                        // The oracle went backwards; keep the stored status and keep polling.
                        Err(e @ LedgerError::IllegalTransition { .. }) => {
                            warn!(order = %job.order, reason = %e, "status update skipped");
                        }
                        Err(e) => return self.drop_job(job, DropReason::Persistence(e)),
                    }
                }

                if job.cancel.is_cancelled() {
                    self.abandon(job);
                    return;
                }

                info!(
                    order = %job.order,
                    delay_ms = delay.as_millis() as u64,
                    attempts,
                    "job requeued"
                );
                self.delayed.insert(ReconciliationJob { attempts, ..job }, delay);
            }
            ReconcileAction::UpdateStatusOnly(status) => {
                match self.ledger.update_order_status(&job.order, status).await {
                    Ok(()) => {
                        info!(
                            order = %job.order,
                            user = job.user,
                            status = %status,
                            "order finished"
                        );
                        self.stats.invalid += 1;
                        self.tracked.remove(&job.order);
                    }
                    Err(e) => self.drop_job(job, DropReason::Persistence(e)),
                }
            }
            ReconcileAction::CreditAndFinish { status, amount } => {
                match self.ledger.settle_order(job.user, &job.order, amount).await {
                    Ok(balance) => {
                        info!(
                            order = %job.order,
                            user = job.user,
                            status = %status,
                            accrual = %amount,
                            balance = %balance,
                            "order settled"
                        );
                        self.stats.processed += 1;
                        self.tracked.remove(&job.order);
                    }
                    Err(e) => self.drop_job(job, DropReason::Persistence(e)),
                }
            }
            ReconcileAction::DropPermanently(reason) => self.drop_job(job, reason),
        }
    }

    fn drop_job(&mut self, job: ReconciliationJob, reason: DropReason) {
        error!(
            order = %job.order,
            user = job.user,
            reason = %reason,
            "reconciliation job dropped"
        );
        self.stats.dropped += 1;
        self.tracked.remove(&job.order);
    }

    fn abandon(&mut self, job: ReconciliationJob) {
        debug!(order = %job.order, "job abandoned on shutdown");
        self.stats.abandoned += 1;
        self.tracked.remove(&job.order);
    }

    fn shutdown(&mut self) {
        let pending = self.ready.len() + self.delayed.len();
        self.stats.abandoned += pending as u64;
        self.ready.clear();
        self.delayed.clear();
        self.tracked.clear();

        info!(
            processed = self.stats.processed,
            invalid = self.stats.invalid,
            dropped = self.stats.dropped,
            abandoned = self.stats.abandoned,
            "accrual dispatcher stopped"
        );
    }
}

/// Sleep until `not_before`, if set. Returns `false` if cancelled while waiting.
async fn pace(cancel: &CancellationToken, not_before: Option<Instant>) -> bool {
    let Some(deadline) = not_before else {
        return true;
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep_until(deadline) => true,
    }
}
