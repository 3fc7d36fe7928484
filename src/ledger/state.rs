use crate::Amount;
use crate::model::{UserId, Withdrawal};

use super::LedgerError;

/// Balance and withdrawn totals of one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserBalance {
    pub current: Amount,
    pub withdrawn: Amount,
}

/// Everything the ledger mutates for a user under one lock.
#[derive(Debug, Default)]
pub(crate) struct UserAccount {
    pub balance: UserBalance,
    pub withdrawals: Vec<Withdrawal>,
}

impl UserAccount {
    /// Add `amount` to the balance. Fails without side effects on overflow.
    pub fn credit(&mut self, user: UserId, amount: Amount) -> Result<Amount, LedgerError> {
        self.balance.current = self
            .balance
            .current
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { user })?;
        Ok(self.balance.current)
    }

    /// Move `amount` from the balance to the withdrawn total, never going negative.
    pub fn debit(&mut self, user: UserId, amount: Amount) -> Result<&UserBalance, LedgerError> {
        if self.balance.current < amount {
            return Err(LedgerError::InsufficientFunds {
                user,
                balance: self.balance.current,
                requested: amount,
            });
        }
        let withdrawn = self
            .balance
            .withdrawn
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { user })?;
        self.balance.current -= amount;
        self.balance.withdrawn = withdrawn;
        Ok(&self.balance)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    #[test]
    fn user_account_default() {
        let account = UserAccount::default();
        assert_eq!(account.balance.current, Amount::ZERO);
        assert_eq!(account.balance.withdrawn, Amount::ZERO);
        assert!(account.withdrawals.is_empty());
    }

    #[test]
    fn credit_returns_new_balance() {
        let mut account = UserAccount::default();
        assert_eq!(
            account.credit(1, Amount::from_parts(10, 0)).unwrap(),
            Amount::from_parts(10, 0)
        );
        assert_eq!(
            account.credit(1, Amount::from_parts(5, 1)).unwrap(),
            Amount::from_parts(105, 1)
        );
    }

    #[test]
    fn credit_overflow_leaves_balance() {
        let mut account = UserAccount::default();
        account.credit(1, Amount::new(Decimal::MAX)).unwrap();

        let result = account.credit(1, Amount::from_parts(1, 0));
        assert_eq!(result, Err(LedgerError::Overflow { user: 1 }));
        assert_eq!(account.balance.current, Amount::new(Decimal::MAX));
    }

    #[test]
    fn debit_moves_funds_to_withdrawn() {
        let mut account = UserAccount::default();
        account.credit(1, Amount::from_parts(10, 0)).unwrap();

        let balance = account.debit(1, Amount::from_parts(4, 0)).unwrap();
        assert_eq!(balance.current, Amount::from_parts(6, 0));
        assert_eq!(balance.withdrawn, Amount::from_parts(4, 0));
    }

    #[test]
    fn debit_exact_balance_succeeds() {
        let mut account = UserAccount::default();
        account.credit(1, Amount::from_parts(10, 0)).unwrap();
        account.debit(1, Amount::from_parts(10, 0)).unwrap();
        assert_eq!(account.balance.current, Amount::ZERO);
    }

    #[test]
    fn debit_over_balance_fails_and_leaves_totals() {
        let mut account = UserAccount::default();
        account.credit(1, Amount::from_parts(10, 0)).unwrap();

        let result = account.debit(7, Amount::from_parts(11, 0));
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientFunds { user: 7, .. })
        ));
        assert_eq!(account.balance.current, Amount::from_parts(10, 0));
        assert_eq!(account.balance.withdrawn, Amount::ZERO);
    }
}
