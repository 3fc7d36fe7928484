//! Persistence boundary for orders and user balances.
//!
//! Every balance mutation, whether an accrual credit or a withdrawal debit,
//! runs inside the same per-user critical section, so a read-modify-write on
//! one user's balance is never interleaved with another one.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;

use crate::Amount;
use crate::model::{Order, OrderNumber, OrderStatus, UserId, Withdrawal};

mod error;
pub use error::LedgerError;

mod state;
pub use state::UserBalance;
use state::UserAccount;

/// Storage operations the accrual pipeline and the withdrawal flow rely on.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Store a freshly submitted order with status `NEW`.
    async fn register_order(
        &self,
        user: UserId,
        order: &OrderNumber,
    ) -> Result<Order, LedgerError>;

    async fn order(&self, order: &OrderNumber) -> Result<Option<Order>, LedgerError>;

    /// Orders of `user`, newest first.
    async fn orders_for(&self, user: UserId) -> Result<Vec<Order>, LedgerError>;

    /// Move an order forward to a non-`PROCESSED` status.
    async fn update_order_status(
        &self,
        order: &OrderNumber,
        status: OrderStatus,
    ) -> Result<(), LedgerError>;

    async fn read_balance(&self, user: UserId) -> Result<UserBalance, LedgerError>;

    /// Atomically add `amount` to the user's balance. Returns the new balance.
    /// Like `debit_user`, only strictly positive amounts are accepted.
    async fn credit_user(&self, user: UserId, amount: Amount) -> Result<Amount, LedgerError>;

    /// Atomically mark `order` as `PROCESSED` with `accrual` and credit its owner.
    /// A zero accrual is a valid settlement. Fails without side effects if the
    /// order is already terminal or the balance would overflow.
    async fn settle_order(
        &self,
        user: UserId,
        order: &OrderNumber,
        accrual: Amount,
    ) -> Result<Amount, LedgerError>;

    /// Atomically withdraw `sum` against `order`, refusing to go below zero.
    async fn debit_user(
        &self,
        user: UserId,
        order: &OrderNumber,
        sum: Amount,
    ) -> Result<UserBalance, LedgerError>;

    /// Withdrawals of `user`, newest first.
    async fn withdrawals(&self, user: UserId) -> Result<Vec<Withdrawal>, LedgerError>;
}

/// In-process ledger: orders in a concurrent map, one mutex per user account.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    orders: DashMap<OrderNumber, Order>,
    accounts: DashMap<UserId, Arc<Mutex<UserAccount>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every known balance, ordered by user id.
    pub fn balances(&self) -> Vec<(UserId, UserBalance)> {
        // Shard guards are released before any user lock is taken.
        let accounts: Vec<_> = self
            .accounts
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        let mut balances: Vec<_> = accounts
            .into_iter()
            .map(|(user, account)| (user, account.lock().balance.clone()))
            .collect();
        balances.sort_by_key(|(user, _)| *user);
        balances
    }

    fn account(&self, user: UserId) -> Arc<Mutex<UserAccount>> {
        self.accounts.entry(user).or_default().clone()
    }

    fn register(&self, user: UserId, number: &OrderNumber) -> Result<Order, LedgerError> {
        let order = match self.orders.entry(number.clone()) {
            Entry::Occupied(existing) if existing.get().user == user => {
                return Err(LedgerError::AlreadySubmitted(number.clone()));
            }
            Entry::Occupied(existing) => {
                return Err(LedgerError::OwnedByOtherUser {
                    order: number.clone(),
                    owner: existing.get().user,
                    user,
                });
            }
            Entry::Vacant(slot) => slot.insert(Order::new(number.clone(), user)).clone(),
        };
        self.account(user);
        Ok(order)
    }

    fn set_status(&self, number: &OrderNumber, status: OrderStatus) -> Result<(), LedgerError> {
        let mut order = self
            .orders
            .get_mut(number)
            .ok_or_else(|| LedgerError::OrderNotFound(number.clone()))?;

        if order.status.is_terminal() {
            return Err(LedgerError::TerminalOrder {
                order: number.clone(),
                status: order.status,
            });
        }
        // PROCESSED carries a credit and only goes through `settle`.
        if status == OrderStatus::Processed || !order.status.can_transition_to(status) {
            return Err(LedgerError::IllegalTransition {
                order: number.clone(),
                from: order.status,
                to: status,
            });
        }

        order.status = status;
        Ok(())
    }

    fn credit(&self, user: UserId, amount: Amount) -> Result<Amount, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount(amount));
        }
        self.account(user).lock().credit(user, amount)
    }

    fn settle(
        &self,
        user: UserId,
        number: &OrderNumber,
        accrual: Amount,
    ) -> Result<Amount, LedgerError> {
        if accrual.is_negative() {
            return Err(LedgerError::InvalidAmount(accrual));
        }

        // Lock order is always account, then order entry.
        let account = self.account(user);
        let mut account = account.lock();
        let mut order = self
            .orders
            .get_mut(number)
            .ok_or_else(|| LedgerError::OrderNotFound(number.clone()))?;

        if order.user != user {
            return Err(LedgerError::OwnedByOtherUser {
                order: number.clone(),
                owner: order.user,
                user,
            });
        }
        if order.status.is_terminal() {
            return Err(LedgerError::TerminalOrder {
                order: number.clone(),
                status: order.status,
            });
        }

        // Credit first: an overflow must leave the order untouched.
        let balance = account.credit(user, accrual)?;
        order.status = OrderStatus::Processed;
        order.accrual = accrual;
        Ok(balance)
    }

    fn debit(
        &self,
        user: UserId,
        number: &OrderNumber,
        sum: Amount,
    ) -> Result<UserBalance, LedgerError> {
        if !sum.is_positive() {
            return Err(LedgerError::InvalidAmount(sum));
        }

        let account = self.account(user);
        let mut account = account.lock();
        let balance = account.debit(user, sum)?.clone();
        account.withdrawals.push(Withdrawal {
            order: number.clone(),
            sum,
            processed_at: Utc::now(),
        });
        Ok(balance)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn register_order(
        &self,
        user: UserId,
        order: &OrderNumber,
    ) -> Result<Order, LedgerError> {
        self.register(user, order)
    }

    async fn order(&self, order: &OrderNumber) -> Result<Option<Order>, LedgerError> {
        Ok(self.orders.get(order).map(|entry| entry.value().clone()))
    }

    async fn orders_for(&self, user: UserId) -> Result<Vec<Order>, LedgerError> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| entry.user == user)
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(orders)
    }

    async fn update_order_status(
        &self,
        order: &OrderNumber,
        status: OrderStatus,
    ) -> Result<(), LedgerError> {
        self.set_status(order, status)
    }

    async fn read_balance(&self, user: UserId) -> Result<UserBalance, LedgerError> {
        Ok(self.account(user).lock().balance.clone())
    }

    async fn credit_user(&self, user: UserId, amount: Amount) -> Result<Amount, LedgerError> {
        self.credit(user, amount)
    }

    async fn settle_order(
        &self,
        user: UserId,
        order: &OrderNumber,
        accrual: Amount,
    ) -> Result<Amount, LedgerError> {
        self.settle(user, order, accrual)
    }

    async fn debit_user(
        &self,
        user: UserId,
        order: &OrderNumber,
        sum: Amount,
    ) -> Result<UserBalance, LedgerError> {
        self.debit(user, order, sum)
    }

    async fn withdrawals(&self, user: UserId) -> Result<Vec<Withdrawal>, LedgerError> {
        let account = self.account(user);
        let account = account.lock();
        Ok(account.withdrawals.iter().rev().cloned().collect())
    }
}
