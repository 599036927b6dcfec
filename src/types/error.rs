//! Error types for the Rust Transfer Engine
//!
//! This module defines all error types that can occur while moving money
//! between accounts. There are three layers:
//!
//! - **`StoreError`**: lower-level failures raised by a storage backend
//!   (driver errors, closed connections, refused connections)
//! - **`PoolError`**: failures of a single pool acquisition attempt
//! - **`LedgerError`**: the error returned to callers of the engine, one
//!   variant per failure kind, with the discriminant exposed as [`ErrorKind`]
//!
//! # Propagation
//!
//! Domain failures (`NoAccount`, `InsufficientFunds`, `Overflow`) reach the
//! caller unchanged. Storage failures are wrapped into `StorageOperation`
//! with the original `StoreError` kept as the source. A failed rollback never
//! replaces the error that caused it.

use super::account::AccountId;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a storage backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// Error returned by the database driver
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The connection was closed and can no longer run statements
    #[error("connection is closed")]
    Closed,

    /// The backend refused to open a new connection
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// A write was attempted on a row this transaction has not locked
    #[error("row {0} is not locked by the current transaction")]
    RowNotLocked(AccountId),

    /// A row disappeared between the locking read and the write
    #[error("row {0} not found")]
    RowNotFound(AccountId),

    /// The backend rejected the operation
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a single [`ConnectionPool::acquire`](crate::pool::ConnectionPool::acquire) call
#[derive(Debug, Error)]
pub enum PoolError {
    /// No permit became free within the timeout
    #[error("no free connection within {waited:?}")]
    Timeout { waited: Duration },

    /// A permit was granted but opening a new connection failed
    ///
    /// The permit has already been returned when this error is seen.
    #[error("can not create connection: {0}")]
    Creation(#[source] StoreError),

    /// The pool was shut down
    #[error("connection pool is shut down")]
    Closed,
}

/// Discriminant of a [`LedgerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoAccount,
    InsufficientFunds,
    Overflow,
    AcquisitionTimeout,
    ResourceCreation,
    StorageOperation,
    PoolClosed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NoAccount => "no_account",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::Overflow => "overflow",
            ErrorKind::AcquisitionTimeout => "acquisition_timeout",
            ErrorKind::ResourceCreation => "resource_creation",
            ErrorKind::StorageOperation => "storage_operation",
            ErrorKind::PoolClosed => "pool_closed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the transfer engine
///
/// Each variant includes the context needed to produce a readable message
/// for the transport layer, which surfaces `to_string()` as the response body.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The referenced account has no row
    #[error("Account {account_id} does not exist")]
    NoAccount {
        /// The account that was not found
        account_id: AccountId,
    },

    /// Balance is below the requested withdrawal
    ///
    /// The account row is left unchanged.
    #[error("Not enough money on account {account_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Account being debited
        account_id: AccountId,
        /// Balance seen under the row lock
        balance: f64,
        /// Requested withdrawal
        requested: f64,
    },

    /// The resulting balance would not be a finite number
    ///
    /// The account row is left unchanged.
    #[error("Balance overflow on account {account_id}: {balance} + {sum} is not a finite number")]
    Overflow {
        /// Account being credited
        account_id: AccountId,
        /// Balance seen under the row lock
        balance: f64,
        /// Requested deposit
        sum: f64,
    },

    /// No connection became free within the retry budget
    #[error("No free database connections after {attempts} attempts of {waited:?}")]
    AcquisitionTimeout {
        /// Number of timed-out attempts
        attempts: u32,
        /// Wait budget of each attempt
        waited: Duration,
    },

    /// Opening a new connection failed on every attempt of the budget
    #[error("Can not create database connection after {attempts} attempts: {source}")]
    ResourceCreation {
        /// Number of failed attempts
        attempts: u32,
        /// Failure of the last attempt
        #[source]
        source: StoreError,
    },

    /// A query, update, commit or rollback failed in the storage layer
    #[error("Can not {operation}: {source}{}", .rollback_error.as_ref().map(|e| format!(" (rollback also failed: {})", e)).unwrap_or_default())]
    StorageOperation {
        /// What the engine was doing, e.g. "send money"
        operation: &'static str,
        /// The original storage failure
        #[source]
        source: StoreError,
        /// Failure of the rollback that followed, if any
        rollback_error: Option<Box<StoreError>>,
    },

    /// The pool has been shut down
    #[error("Connection pool is shut down")]
    PoolClosed,
}

// Helper functions for creating common errors

impl LedgerError {
    /// Create a NoAccount error
    pub fn no_account(account_id: AccountId) -> Self {
        LedgerError::NoAccount { account_id }
    }

    /// Create an InsufficientFunds error
    pub fn insufficient_funds(account_id: AccountId, balance: f64, requested: f64) -> Self {
        LedgerError::InsufficientFunds {
            account_id,
            balance,
            requested,
        }
    }

    /// Create an Overflow error
    pub fn overflow(account_id: AccountId, balance: f64, sum: f64) -> Self {
        LedgerError::Overflow {
            account_id,
            balance,
            sum,
        }
    }

    /// Wrap a storage failure
    pub fn storage(operation: &'static str, source: StoreError) -> Self {
        LedgerError::StorageOperation {
            operation,
            source,
            rollback_error: None,
        }
    }

    /// The taxonomy discriminant of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::NoAccount { .. } => ErrorKind::NoAccount,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::Overflow { .. } => ErrorKind::Overflow,
            LedgerError::AcquisitionTimeout { .. } => ErrorKind::AcquisitionTimeout,
            LedgerError::ResourceCreation { .. } => ErrorKind::ResourceCreation,
            LedgerError::StorageOperation { .. } => ErrorKind::StorageOperation,
            LedgerError::PoolClosed => ErrorKind::PoolClosed,
        }
    }

    /// Whether the failure was decided by account state rather than by the
    /// storage layer or the pool
    pub fn is_domain(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NoAccount | ErrorKind::InsufficientFunds | ErrorKind::Overflow
        )
    }

    /// Record a failed rollback on this error
    ///
    /// Only `StorageOperation` has a slot for it; every other variant is
    /// returned unchanged and the caller is expected to log the rollback
    /// failure instead.
    pub fn with_rollback_failure(self, rollback: StoreError) -> Self {
        match self {
            LedgerError::StorageOperation {
                operation, source, ..
            } => LedgerError::StorageOperation {
                operation,
                source,
                rollback_error: Some(Box::new(rollback)),
            },
            other => other,
        }
    }
}
