//! Storage traits for connections and connection factories
//!
//! These traits are the seam between the engine and a storage backend. The
//! pool, the repository and the coordinator only ever see these traits, so
//! the Postgres backend and the in-memory backend are interchangeable.

use crate::types::{AccountId, StoreError};
use async_trait::async_trait;

/// A transactional session against the account table
///
/// Auto-commit is off: the first locking read opens a transaction which stays
/// open until [`commit`](LedgerConnection::commit) or
/// [`rollback`](LedgerConnection::rollback). Row locks taken by
/// [`fetch_amount_for_update`](LedgerConnection::fetch_amount_for_update) are
/// held by the storage engine for the whole transaction.
#[async_trait]
pub trait LedgerConnection: Send + 'static {
    /// Read the balance of an account without locking it
    ///
    /// Returns `Ok(None)` when no row has this id.
    async fn fetch_amount(&mut self, account_id: AccountId) -> Result<Option<f64>, StoreError>;

    /// Read the balance of an account and take an exclusive row lock on it
    ///
    /// Blocks while another transaction holds the lock. Returns `Ok(None)`
    /// when no row has this id.
    async fn fetch_amount_for_update(
        &mut self,
        account_id: AccountId,
    ) -> Result<Option<f64>, StoreError>;

    /// Overwrite the balance of a row locked by this transaction
    async fn store_amount(&mut self, account_id: AccountId, amount: f64)
        -> Result<(), StoreError>;

    /// Make the current transaction's writes durable and release its locks
    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard the current transaction's writes and release its locks
    async fn rollback(&mut self) -> Result<(), StoreError>;

    /// Whether a transaction is open, holding locks or uncommitted writes
    fn in_transaction(&self) -> bool;

    /// Close the session
    async fn close(self) -> Result<(), StoreError>;
}

/// Opens new [`LedgerConnection`]s for the pool
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Connection type produced by this factory
    type Connection: LedgerConnection;

    /// Open a new session with auto-commit disabled
    async fn connect(&self) -> Result<Self::Connection, StoreError>;
}
