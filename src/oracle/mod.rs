//! Client side of the external accrual oracle.
//!
//! An oracle lookup is a single request per order number. The raw response is
//! classified into an [`OracleOutcome`]; retrying is the dispatcher's business.

use std::time::Duration;

use async_trait::async_trait;

use crate::Amount;
use crate::model::{OrderNumber, OrderStatus};

mod error;
pub use error::OracleError;

mod http;
pub use http::{HttpOracle, parse_accrual_body};

/// Result of a single oracle lookup. Consumed immediately, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleOutcome {
    /// The oracle is still computing the accrual (`REGISTERED` or `PROCESSING`).
    Pending(OrderStatus),
    /// The oracle reached a final verdict (`PROCESSED` with an accrual, or `INVALID`).
    Settled { status: OrderStatus, accrual: Amount },
    /// The oracle throttled us; `retry_after` carries its hint when it gave one.
    RateLimited { retry_after: Option<Duration> },
    TransientError(OracleError),
    PermanentError(OracleError),
}

impl OracleOutcome {
    pub fn failed(err: OracleError) -> Self {
        if err.is_transient() {
            OracleOutcome::TransientError(err)
        } else {
            OracleOutcome::PermanentError(err)
        }
    }
}

/// Lookup capability of the accrual oracle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccrualOracle: Send + Sync {
    /// Issue exactly one lookup for `order`. Must not touch persistence.
    async fn lookup(&self, order: &OrderNumber) -> OracleOutcome;
}
