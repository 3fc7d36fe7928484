//! Core domain types for accrual reconciliation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::Amount;

/// User identifier.
pub type UserId = u32;

/// Rejected order number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderNumberError {
    #[error("order number is empty")]
    Empty,
    #[error("order number '{0}' contains non-digit characters")]
    NotNumeric(String),
    #[error("order number '{0}' fails the luhn checksum")]
    Luhn(String),
}

/// A caller-supplied, Luhn-valid numeric order number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn parse(raw: &str) -> Result<Self, OrderNumberError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(OrderNumberError::Empty);
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(OrderNumberError::NotNumeric(raw.to_string()));
        }
        if !luhn_valid(raw) {
            return Err(OrderNumberError::Luhn(raw.to_string()));
        }
        Ok(OrderNumber(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for OrderNumber {
    type Err = OrderNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderNumber::parse(s)
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Luhn checksum over an all-digit string.
fn luhn_valid(digits: &str) -> bool {
    let sum: u32 = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(idx, b)| {
            let digit = u32::from(b - b'0');
            if idx % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                digit
            }
        })
        .sum();
    sum % 10 == 0
}

/// Lifecycle status of an order.
///
/// Statuses only move forward: `New -> Registered -> Processing -> {Processed | Invalid}`.
/// `Registered` may be skipped by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    New,
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Registered => "REGISTERED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }

    fn rank(&self) -> u8 {
        match self {
            OrderStatus::New => 0,
            OrderStatus::Registered => 1,
            OrderStatus::Processing => 2,
            OrderStatus::Invalid | OrderStatus::Processed => 3,
        }
    }

    /// Whether a persisted `self` may be overwritten with `next`.
    /// Rewriting the same non-terminal status is allowed (a no-op).
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "REGISTERED" => Ok(OrderStatus::Registered),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            other => Err(other.to_string()),
        }
    }
}

/// A submitted order as stored by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub number: OrderNumber,
    pub user: UserId,
    pub status: OrderStatus,
    /// Set exactly once, when the order becomes `Processed`.
    pub accrual: Amount,
    pub uploaded_at: DateTime<Utc>,
}

impl Order {
    pub fn new(number: OrderNumber, user: UserId) -> Self {
        Self {
            number,
            user,
            status: OrderStatus::New,
            accrual: Amount::ZERO,
            uploaded_at: Utc::now(),
        }
    }
}

/// A successful withdrawal of points against an order number.
#[derive(Debug, Clone, PartialEq)]
pub struct Withdrawal {
    pub order: OrderNumber,
    pub sum: Amount,
    pub processed_at: DateTime<Utc>,
}

/// One unit of reconciliation work, tracking a single order through the oracle.
#[derive(Debug, Clone)]
pub struct ReconciliationJob {
    pub user: UserId,
    pub order: OrderNumber,
    /// Transient oracle failures observed so far.
    pub attempts: u32,
    pub cancel: CancellationToken,
}

impl ReconciliationJob {
    pub fn new(user: UserId, order: OrderNumber, cancel: CancellationToken) -> Self {
        Self {
            user,
            order,
            attempts: 0,
            cancel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_luhn_valid_numbers() {
        for raw in ["79927398713", "12345678903", "2377225624", "0"] {
            let number = OrderNumber::parse(raw).unwrap();
            assert_eq!(number.as_str(), raw);
        }
    }

    #[test]
    fn parse_trims_whitespace() {
        let number = OrderNumber::parse(" 79927398713\n").unwrap();
        assert_eq!(number.to_string(), "79927398713");
    }

    #[test]
    fn parse_rejects_bad_checksum() {
        assert_eq!(
            OrderNumber::parse("79927398710"),
            Err(OrderNumberError::Luhn("79927398710".to_string()))
        );
    }

    #[test]
    fn parse_rejects_non_digits() {
        assert!(matches!(
            OrderNumber::parse("7992-7398713"),
            Err(OrderNumberError::NotNumeric(_))
        ));
        assert!(matches!(
            OrderNumber::parse("-79927398713"),
            Err(OrderNumberError::NotNumeric(_))
        ));
        assert_eq!(OrderNumber::parse("  "), Err(OrderNumberError::Empty));
    }

    #[test]
    fn status_round_trips_through_wire_names() {
        for status in [
            OrderStatus::New,
            OrderStatus::Registered,
            OrderStatus::Processing,
            OrderStatus::Invalid,
            OrderStatus::Processed,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>(), Ok(status));
        }
        assert_eq!("DONE".parse::<OrderStatus>(), Err("DONE".to_string()));
    }

    #[test]
    fn status_only_moves_forward() {
        use OrderStatus::*;

        assert!(New.can_transition_to(Registered));
        assert!(New.can_transition_to(Processing));
        assert!(Registered.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processed));
        assert!(Processing.can_transition_to(Invalid));

        assert!(!Processing.can_transition_to(Registered));
        assert!(!Processed.can_transition_to(Processed));
        assert!(!Processed.can_transition_to(Invalid));
        assert!(!Invalid.can_transition_to(Processing));
    }

    #[test]
    fn new_order_starts_unsettled() {
        let order = Order::new(OrderNumber::parse("79927398713").unwrap(), 1);
        assert_eq!(order.status, OrderStatus::New);
        assert!(order.accrual.is_zero());
    }
}
