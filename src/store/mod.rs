//! Storage module
//!
//! Handles the connection to the account table.
//!
//! # Components
//!
//! - `traits` - `LedgerConnection` and `ConnectionFactory`, the seam the pool is generic over
//! - `postgres` - PostgreSQL backend built on `sqlx`
//! - `memory` - In-memory transactional backend with row locks and fault injection

pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::{MemoryConnection, MemoryStore};
pub use postgres::{PgConnector, PgLedgerConnection};
pub use traits::{ConnectionFactory, LedgerConnection};

use crate::types::Account;

/// Accounts used to seed a fresh store when no seed file is configured
pub fn demo_accounts() -> Vec<Account> {
    [
        (1, 500.0),
        (2, 300.0),
        (3, 200.0),
        (4, 300.0),
        (5, 400.0),
        (6, 500.0),
        (7, 1000.0),
    ]
    .into_iter()
    .map(|(account_id, amount)| Account::new(account_id, amount))
    .collect()
}
