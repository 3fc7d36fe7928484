//! Failure classification for oracle lookups.

use thiserror::Error;

/// Why a lookup did not produce a usable status.
///
/// Whether the failure is worth retrying is decided by [`OracleError::is_transient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("oracle does not know the order yet")]
    NotRegistered,

    #[error("unexpected http status {0}")]
    UnexpectedStatus(u16),

    #[error("malformed response body: {0}")]
    MalformedBody(String),

    #[error("unknown order status '{0}'")]
    UnknownStatus(String),

    #[error("order reported as PROCESSED without an accrual")]
    MissingAccrual,

    #[error("negative accrual {0}")]
    NegativeAccrual(String),

    #[error("response is for order {received}, expected {expected}")]
    OrderMismatch { expected: String, received: String },
}

impl OracleError {
    /// Failures that a later identical request may not repeat.
    pub fn is_transient(&self) -> bool {
        match self {
            OracleError::Timeout | OracleError::Network(_) | OracleError::NotRegistered => true,
            OracleError::UnexpectedStatus(code) => *code >= 500,
            OracleError::MalformedBody(_)
            | OracleError::UnknownStatus(_)
            | OracleError::MissingAccrual
            | OracleError::NegativeAccrual(_)
            | OracleError::OrderMismatch { .. } => false,
        }
    }
}
