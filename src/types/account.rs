//! Account-related types for the Rust Transfer Engine
//!
//! This module defines the Account snapshot returned by balance queries and
//! the transfer request accepted by the coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Account identifier
///
/// Matches the `id BIGINT PRIMARY KEY` column of the `account` table.
pub type AccountId = i64;

/// Tolerance used when comparing balances
///
/// Balances are stored as `f64`, so two snapshots of the same account are
/// considered equal when their amounts differ by less than this value.
pub const BALANCE_EPSILON: f64 = 0.001;

/// Snapshot of one account row
///
/// Rows pre-exist in storage and are never created or deleted by the engine.
/// A snapshot is a copy taken at read time; later transfers do not update it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// The account ID (immutable, unique)
    pub account_id: AccountId,

    /// Current balance of the account
    pub amount: f64,
}

impl Account {
    /// Create a snapshot for the given account and balance
    pub fn new(account_id: AccountId, amount: f64) -> Self {
        Account { account_id, amount }
    }

    /// Whether this account's balance equals `expected` within [`BALANCE_EPSILON`]
    pub fn balance_matches(&self, expected: f64) -> bool {
        (self.amount - expected).abs() < BALANCE_EPSILON
    }
}

impl PartialEq for Account {
    /// Same account and a balance within [`BALANCE_EPSILON`]
    fn eq(&self, other: &Self) -> bool {
        self.account_id == other.account_id && self.balance_matches(other.amount)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account {} amount {}", self.account_id, self.amount)
    }
}

/// A request to move `sum` from one account to another
///
/// `sum` must be a finite, strictly positive number. The HTTP layer enforces
/// this through [`TransferRequest::validate`] before the coordinator sees it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Account to debit
    pub from_account_id: AccountId,

    /// Account to credit
    pub to_account_id: AccountId,

    /// Amount to move
    pub sum: f64,
}

impl TransferRequest {
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, sum: f64) -> Self {
        TransferRequest {
            from_account_id,
            to_account_id,
            sum,
        }
    }

    /// Check the request before it reaches the coordinator
    ///
    /// # Errors
    ///
    /// Returns a human-readable message when `sum` is zero, negative, NaN or
    /// infinite.
    pub fn validate(&self) -> Result<(), String> {
        if !self.sum.is_finite() || self.sum <= 0.0 {
            return Err(format!("Incorrect sum: {}", self.sum));
        }
        Ok(())
    }
}

impl fmt::Display for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from account {} to account {}",
            self.sum, self.from_account_id, self.to_account_id
        )
    }
}
