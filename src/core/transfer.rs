//! Transfer coordinator
//!
//! Moves money between two accounts as one transaction, safe under any
//! pattern of concurrent transfers including cycles.
//!
//! # Lock ordering
//!
//! Row locks are always taken in one global order by account id, the
//! higher id first, whatever the direction of the transfer:
//!
//! ```text
//! from > to:   withdraw(from)  then  deposit(to)
//! from <= to:  deposit(to)     then  withdraw(from)
//! ```
//!
//! Two transfers over the same pair of accounts therefore lock them in the
//! same order and can never wait on each other in a cycle. The locks
//! themselves are held by the storage engine until commit or rollback; no
//! in-process lock is taken per account.
//!
//! # Failure handling
//!
//! Any failure after the connection was acquired rolls the transaction back
//! and returns the original error. A failed rollback is attached to a
//! storage error or logged next to a domain error, never returned in its
//! place. The connection goes back to the pool when the guard drops, on every
//! path. It is discarded instead of recycled if the storage layer failed
//! while it was in use, or if the transfer future was dropped before the
//! transaction ended, in which case closing the session undoes it.

use crate::core::repository::AccountRepository;
use crate::pool::{BoundedAcquirer, ConnectionPool, PooledConnection};
use crate::store::{ConnectionFactory, LedgerConnection};
use crate::types::{Account, AccountId, LedgerError};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Runs transfers and balance queries against pooled connections
pub struct TransferCoordinator<F: ConnectionFactory> {
    acquirer: BoundedAcquirer<F>,
    repository: AccountRepository,
}

impl<F: ConnectionFactory> TransferCoordinator<F> {
    pub fn new(acquirer: BoundedAcquirer<F>) -> Self {
        Self {
            acquirer,
            repository: AccountRepository::new(),
        }
    }

    /// The pool this coordinator takes connections from
    pub fn pool(&self) -> &Arc<ConnectionPool<F>> {
        self.acquirer.pool()
    }

    /// Move `sum` from one account to another atomically
    ///
    /// Either both balances change and the transaction is committed, or
    /// neither does.
    ///
    /// # Arguments
    ///
    /// * `from` - Account to debit
    /// * `to` - Account to credit
    /// * `sum` - Amount to move
    ///
    /// # Errors
    ///
    /// - `NoAccount`, `InsufficientFunds`, `Overflow` from the repository
    /// - `AcquisitionTimeout`, `ResourceCreation`, `PoolClosed` if no
    ///   connection could be obtained
    /// - `StorageOperation` if a query, update or the commit failed
    pub async fn transfer(&self, from: AccountId, to: AccountId, sum: f64) -> Result<(), LedgerError> {
        let mut conn = self.acquirer.acquire().await?;
        debug!(from, to, sum, "transfer started");

        match self.apply(from, to, sum, &mut *conn).await {
            Ok(()) => {
                info!(from, to, sum, "transfer committed");
                Ok(())
            }
            Err(err) => Err(self.abort(&mut conn, err).await),
        }
    }

    /// Read the current balance of an account
    ///
    /// No row lock is taken and nothing is written.
    ///
    /// # Errors
    ///
    /// - `NoAccount` if no row has this id
    /// - acquisition errors as for [`transfer`](Self::transfer)
    /// - `StorageOperation` if the read failed
    pub async fn get_account_by_id(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        let mut conn = self.acquirer.acquire().await?;

        let result = self.repository.get(account_id, &mut *conn).await;
        if let Err(err) = &result {
            if !err.is_domain() {
                error!(account_id, error = %err, "balance query failed");
                conn.mark_broken();
            }
        }
        result
    }

    async fn apply(
        &self,
        from: AccountId,
        to: AccountId,
        sum: f64,
        conn: &mut F::Connection,
    ) -> Result<(), LedgerError> {
        if from > to {
            self.repository.withdraw(from, sum, conn).await?;
            self.repository.deposit(to, sum, conn).await?;
        } else {
            self.repository.deposit(to, sum, conn).await?;
            self.repository.withdraw(from, sum, conn).await?;
        }

        conn.commit()
            .await
            .map_err(|e| LedgerError::storage("commit transfer", e))
    }

    // Roll back after a failed transfer and return the error the caller sees.
    async fn abort(
        &self,
        conn: &mut PooledConnection<F::Connection>,
        err: LedgerError,
    ) -> LedgerError {
        if err.is_domain() {
            info!(error = %err, "transfer rejected, rolling back");
        } else {
            error!(error = %err, "transfer failed, rolling back");
            conn.mark_broken();
        }

        match conn.rollback().await {
            Ok(()) => err,
            Err(rollback) => {
                error!(error = %rollback, original = %err, "rollback failed");
                conn.mark_broken();
                err.with_rollback_failure(rollback)
            }
        }
    }
}
