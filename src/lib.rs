//! Rust Transfer Engine Library
//! # Overview
//!
//! This library moves money between accounts stored in a relational table,
//! one transaction per transfer, safely under any number of concurrent
//! transfers.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (Account, TransferRequest, errors)
//! - [`store`] - Storage seam (`LedgerConnection`, `ConnectionFactory`) with
//!   PostgreSQL and in-memory backends
//! - [`pool`] - Bounded connection pool and retrying acquisition:
//!   - [`pool::connection_pool`] - FIFO admission control and connection reuse
//!   - [`pool::acquisition`] - Independent retry budgets for timeouts and
//!     connection failures
//! - [`core`] - Business logic components:
//!   - [`core::repository`] - Single-row reads and locked balance updates
//!   - [`core::transfer`] - Atomic transfers with id-ordered row locking
//! - [`http`] - HTTP transport
//! - [`config`], [`cli`], [`logging`], [`io`] - Startup plumbing
//!
//! # Concurrency
//!
//! Account rows are protected by the storage engine's row locks, held for
//! the life of each transaction. The only in-process shared state is the
//! pool's permit counter and idle set. Deadlocks between transfers over the
//! same accounts are ruled out by always locking the higher account id first.
//!
//! # Errors
//!
//! Every engine operation returns [`LedgerError`]:
//!
//! - **NoAccount**, **InsufficientFunds**, **Overflow**: decided by account state
//! - **AcquisitionTimeout**, **ResourceCreation**, **PoolClosed**: no connection
//! - **StorageOperation**: a query, update, commit or rollback failed

// Module declarations
pub mod cli;
pub mod config;
pub mod core;
pub mod http;
pub mod io;
pub mod logging;
pub mod pool;
pub mod store;
pub mod types;

pub use crate::core::{AccountRepository, TransferCoordinator};
pub use config::{AppConfig, Driver};
pub use pool::{BoundedAcquirer, ConnectionPool, RetryPolicy};
pub use store::{ConnectionFactory, LedgerConnection, MemoryStore, PgConnector};
pub use types::{Account, AccountId, ErrorKind, LedgerError, TransferRequest};
