//! Account repository
//!
//! Single-row reads and locked balance updates. One call touches exactly one
//! account row. The repository never commits or rolls back: the enclosing
//! transaction belongs to the caller.

use crate::store::LedgerConnection;
use crate::types::{Account, AccountId, LedgerError};

/// Stateless access to the account table through a [`LedgerConnection`]
#[derive(Debug, Default, Clone, Copy)]
pub struct AccountRepository;

/// Direction of a locked balance update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Credit,
    Debit,
}

impl Change {
    fn operation(self) -> &'static str {
        match self {
            Change::Credit => "deposit",
            Change::Debit => "withdraw",
        }
    }
}

impl AccountRepository {
    pub fn new() -> Self {
        AccountRepository
    }

    /// Read an account without locking it
    ///
    /// # Arguments
    ///
    /// * `account_id` - The account to read
    /// * `conn` - Connection to read through
    ///
    /// # Returns
    ///
    /// The account with its current balance
    ///
    /// # Errors
    ///
    /// - `NoAccount` if no row has this id
    /// - `StorageOperation` if the read failed
    pub async fn get<C: LedgerConnection>(
        &self,
        account_id: AccountId,
        conn: &mut C,
    ) -> Result<Account, LedgerError> {
        let amount = conn
            .fetch_amount(account_id)
            .await
            .map_err(|e| LedgerError::storage("get balance", e))?
            .ok_or_else(|| LedgerError::no_account(account_id))?;

        Ok(Account::new(account_id, amount))
    }

    /// Add `sum` to an account under an exclusive row lock
    ///
    /// The lock is held until the caller commits or rolls back.
    ///
    /// # Errors
    ///
    /// - `NoAccount` if no row has this id
    /// - `Overflow` if the new balance is not a finite number; the row is
    ///   not written
    /// - `StorageOperation` if the locked read or the write failed
    pub async fn deposit<C: LedgerConnection>(
        &self,
        account_id: AccountId,
        sum: f64,
        conn: &mut C,
    ) -> Result<(), LedgerError> {
        self.locked_update(account_id, sum, Change::Credit, conn)
            .await
    }

    /// Subtract `sum` from an account under an exclusive row lock
    ///
    /// The lock is held until the caller commits or rolls back.
    ///
    /// # Errors
    ///
    /// - `NoAccount` if no row has this id
    /// - `InsufficientFunds` if the balance is below `sum`; the row is not
    ///   written
    /// - `StorageOperation` if the locked read or the write failed
    pub async fn withdraw<C: LedgerConnection>(
        &self,
        account_id: AccountId,
        sum: f64,
        conn: &mut C,
    ) -> Result<(), LedgerError> {
        self.locked_update(account_id, sum, Change::Debit, conn)
            .await
    }

    // Lock the row, compute the new balance from the locked value, write it
    // back to the same row. Both directions go through here.
    async fn locked_update<C: LedgerConnection>(
        &self,
        account_id: AccountId,
        sum: f64,
        change: Change,
        conn: &mut C,
    ) -> Result<(), LedgerError> {
        let operation = change.operation();
        let balance = conn
            .fetch_amount_for_update(account_id)
            .await
            .map_err(|e| LedgerError::storage(operation, e))?
            .ok_or_else(|| LedgerError::no_account(account_id))?;

        let new_balance = match change {
            Change::Credit => {
                let credited = balance + sum;
                if !credited.is_finite() {
                    return Err(LedgerError::overflow(account_id, balance, sum));
                }
                credited
            }
            Change::Debit => {
                if balance < sum {
                    return Err(LedgerError::insufficient_funds(account_id, balance, sum));
                }
                balance - sum
            }
        };

        conn.store_amount(account_id, new_balance)
            .await
            .map_err(|e| LedgerError::storage(operation, e))
    }
}
