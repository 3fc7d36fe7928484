//! Error types for ledger operations.

use thiserror::Error;

use crate::Amount;
use crate::model::{OrderNumber, OrderStatus, UserId};

/// A rejected ledger write or read.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("order {0} not found")]
    OrderNotFound(OrderNumber),

    #[error("order {0} was already submitted by this user")]
    AlreadySubmitted(OrderNumber),

    #[error("order {order} belongs to user {owner}, not {user}")]
    OwnedByOtherUser {
        order: OrderNumber,
        owner: UserId,
        user: UserId,
    },

    #[error("order {order} is already {status}")]
    TerminalOrder {
        order: OrderNumber,
        status: OrderStatus,
    },

    #[error("order {order} cannot move from {from} to {to}")]
    IllegalTransition {
        order: OrderNumber,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("insufficient funds for user {user}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        user: UserId,
        balance: Amount,
        requested: Amount,
    },

    #[error("amount {0} is not allowed here")]
    InvalidAmount(Amount),

    #[error("balance of user {user} would overflow")]
    Overflow { user: UserId },
}
