//! Decision step: turns an oracle outcome into the action the dispatcher executes.
//!
//! Everything here is pure; persistence and scheduling happen in the dispatcher.

use std::time::Duration;

use thiserror::Error;

use crate::Amount;
use crate::ledger::LedgerError;
use crate::model::{OrderStatus, ReconciliationJob};
use crate::oracle::{OracleError, OracleOutcome};

/// Delays and attempt cap applied when a job has to come back later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the oracle reports the order is still being computed.
    pub poll_delay: Duration,
    /// Delay after a 429 that carried no usable hint.
    pub rate_limit_delay: Duration,
    /// Upper bound applied to the oracle's own `Retry-After` hint.
    pub max_rate_limit_delay: Duration,
    /// Delay after the first transient failure, doubled for each further one.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Transient failures tolerated before the job is dropped.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            poll_delay: Duration::from_secs(1),
            rate_limit_delay: Duration::from_secs(60),
            max_rate_limit_delay: Duration::from_secs(600),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Backoff after the `failures`-th transient failure (1-based).
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1u32 << exponent)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

/// Why a job left the queue without reaching a terminal status.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DropReason {
    #[error("oracle error: {0}")]
    Permanent(OracleError),

    #[error("gave up after {attempts} attempts, last error: {last}")]
    RetriesExhausted { attempts: u32, last: OracleError },

    #[error("persistence error: {0}")]
    Persistence(LedgerError),
}

/// What the dispatcher must do with a job after a lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    /// Persist `status` (if any) and put the job back after `delay`,
    /// carrying `attempts` as its new transient-failure count.
    Requeue {
        delay: Duration,
        status: Option<OrderStatus>,
        attempts: u32,
    },
    /// Persist a terminal status that carries no credit.
    UpdateStatusOnly(OrderStatus),
    /// Persist a terminal status and credit its accrual to the owner, atomically.
    CreditAndFinish { status: OrderStatus, amount: Amount },
    DropPermanently(DropReason),
}

/// Map one oracle outcome for `job` to the action to execute.
pub fn reconcile(
    job: &ReconciliationJob,
    outcome: OracleOutcome,
    policy: &RetryPolicy,
) -> ReconcileAction {
    match outcome {
        OracleOutcome::Pending(status) => ReconcileAction::Requeue {
            delay: policy.poll_delay,
            status: Some(status),
            attempts: job.attempts,
        },
        OracleOutcome::RateLimited { retry_after } => ReconcileAction::Requeue {
            delay: retry_after
                .map(|hint| hint.min(policy.max_rate_limit_delay))
                .unwrap_or(policy.rate_limit_delay),
            status: None,
            attempts: job.attempts,
        },
        OracleOutcome::Settled {
            status: OrderStatus::Processed,
            accrual,
        } => ReconcileAction::CreditAndFinish {
            status: OrderStatus::Processed,
            amount: accrual,
        },
        OracleOutcome::Settled {
            status: OrderStatus::Invalid,
            ..
        } => ReconcileAction::UpdateStatusOnly(OrderStatus::Invalid),
        // A non-terminal "settlement" is just another poll.
        OracleOutcome::Settled { status, .. } => ReconcileAction::Requeue {
            delay: policy.poll_delay,
            status: Some(status),
            attempts: job.attempts,
        },
        OracleOutcome::TransientError(err) => {
            let failures = job.attempts.saturating_add(1);
            if failures >= policy.max_attempts {
                ReconcileAction::DropPermanently(DropReason::RetriesExhausted {
                    attempts: failures,
                    last: err,
                })
            } else {
                ReconcileAction::Requeue {
                    delay: policy.backoff_for(failures),
                    status: None,
                    attempts: failures,
                }
            }
        }
        OracleOutcome::PermanentError(err) => {
            ReconcileAction::DropPermanently(DropReason::Permanent(err))
        }
    }
}
