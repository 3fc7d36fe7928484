//! User-facing operations: submit orders, withdraw points, query balances.
//!
//! Submission only registers the order and enqueues it; the accrual itself
//! arrives later through the dispatcher.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::Amount;
use crate::dispatcher::{DispatcherHandle, SubmitError};
use crate::ledger::{Ledger, LedgerError, UserBalance};
use crate::model::{Order, OrderNumber, OrderNumberError, UserId, Withdrawal};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid order number: {0}")]
    InvalidOrderNumber(#[from] OrderNumberError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("order stored but not queued for accrual: {0}")]
    Submit(#[from] SubmitError),
}

pub struct LoyaltyService<L> {
    ledger: Arc<L>,
    dispatcher: DispatcherHandle,
}

impl<L: Ledger> LoyaltyService<L> {
    pub fn new(ledger: Arc<L>, dispatcher: DispatcherHandle) -> Self {
        Self { ledger, dispatcher }
    }

    /// Validate, store and enqueue an order for accrual.
    pub async fn submit_order(&self, user: UserId, raw: &str) -> Result<OrderNumber, ServiceError> {
        let number = OrderNumber::parse(raw)?;
        self.ledger.register_order(user, &number).await?;
        self.dispatcher.submit(user, number.clone())?;

        info!(order = %number, user, "order accepted");
        Ok(number)
    }

    /// Spend `sum` points against the order number `raw_order`.
    pub async fn withdraw(
        &self,
        user: UserId,
        raw_order: &str,
        sum: Amount,
    ) -> Result<UserBalance, ServiceError> {
        let number = OrderNumber::parse(raw_order)?;
        let balance = self.ledger.debit_user(user, &number, sum).await?;

        info!(order = %number, user, sum = %sum, balance = %balance.current, "withdrawal applied");
        Ok(balance)
    }

    pub async fn balance(&self, user: UserId) -> Result<UserBalance, ServiceError> {
        Ok(self.ledger.read_balance(user).await?)
    }

    pub async fn orders(&self, user: UserId) -> Result<Vec<Order>, ServiceError> {
        Ok(self.ledger.orders_for(user).await?)
    }

    pub async fn withdrawals(&self, user: UserId) -> Result<Vec<Withdrawal>, ServiceError> {
        Ok(self.ledger.withdrawals(user).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::DispatcherConfig;
    use crate::dispatcher::Dispatcher;
    use crate::ledger::MemoryLedger;
    use crate::model::OrderStatus;
    use crate::oracle::{MockAccrualOracle, OracleOutcome};

    fn setup(
        oracle: MockAccrualOracle,
    ) -> (
        LoyaltyService<MemoryLedger>,
        Dispatcher<MockAccrualOracle, MemoryLedger>,
        Arc<MemoryLedger>,
    ) {
        let ledger = Arc::new(MemoryLedger::new());
        let config = DispatcherConfig {
            min_request_interval: Duration::from_millis(10),
            ..DispatcherConfig::default()
        };
        let (dispatcher, handle) =
            Dispatcher::new(config, oracle, ledger.clone(), CancellationToken::new());
        (LoyaltyService::new(ledger.clone(), handle), dispatcher, ledger)
    }

    #[tokio::test]
    async fn submit_rejects_luhn_invalid_numbers() {
        let (service, _dispatcher, ledger) = setup(MockAccrualOracle::new());

        let result = service.submit_order(1, "79927398710").await;
        assert!(matches!(
            result,
            Err(ServiceError::InvalidOrderNumber(OrderNumberError::Luhn(_)))
        ));
        assert!(ledger.orders_for(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn submit_twice_reports_duplicate() {
        let (service, _dispatcher, _ledger) = setup(MockAccrualOracle::new());

        service.submit_order(1, "79927398713").await.unwrap();
        let again = service.submit_order(1, "79927398713").await;
        assert!(matches!(
            again,
            Err(ServiceError::Ledger(LedgerError::AlreadySubmitted(_)))
        ));

        let other = service.submit_order(2, "79927398713").await;
        assert!(matches!(
            other,
            Err(ServiceError::Ledger(LedgerError::OwnedByOtherUser { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn submitted_order_is_reconciled_then_withdrawable() {
        let mut oracle = MockAccrualOracle::new();
        oracle.expect_lookup().times(1).returning(|_| OracleOutcome::Settled {
            status: OrderStatus::Processed,
            accrual: Amount::from_parts(72_998, 2),
        });
        let (service, dispatcher, _ledger) = setup(oracle);

        service.submit_order(1, "79927398713").await.unwrap();
        let task = tokio::spawn(dispatcher.run());

        // Wait for the single lookup to land.
        while service.balance(1).await.unwrap().current.is_zero() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let balance = service
            .withdraw(1, "2377225624", Amount::from_parts(500, 0))
            .await
            .unwrap();
        assert_eq!(balance.current, Amount::from_parts(22_998, 2));
        assert_eq!(balance.withdrawn, Amount::from_parts(500, 0));

        let orders = service.orders(1).await.unwrap();
        assert_eq!(orders[0].status, OrderStatus::Processed);
        assert_eq!(service.withdrawals(1).await.unwrap().len(), 1);

        drop(service);
        let stats = task.await.unwrap();
        assert_eq!(stats.processed, 1);
    }

    #[tokio::test]
    async fn withdraw_more_than_balance_fails() {
        let (service, _dispatcher, ledger) = setup(MockAccrualOracle::new());
        ledger.credit_user(1, Amount::from_parts(10, 0)).await.unwrap();

        let result = service
            .withdraw(1, "2377225624", Amount::from_parts(11, 0))
            .await;
        assert!(matches!(
            result,
            Err(ServiceError::Ledger(LedgerError::InsufficientFunds { .. }))
        ));
        assert_eq!(
            service.balance(1).await.unwrap().current,
            Amount::from_parts(10, 0)
        );
    }

    #[tokio::test]
    async fn withdraw_validates_order_number() {
        let (service, _dispatcher, _ledger) = setup(MockAccrualOracle::new());
        let result = service.withdraw(1, "abc", Amount::from_parts(1, 0)).await;
        assert!(matches!(result, Err(ServiceError::InvalidOrderNumber(_))));
    }
}
