//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `account`: Account snapshots, identifiers and transfer requests
//! - `error`: Error types for the storage layer, the pool and the engine

pub mod account;
pub mod error;

pub use account::{Account, AccountId, TransferRequest, BALANCE_EPSILON};
pub use error::{ErrorKind, LedgerError, PoolError, StoreError};
