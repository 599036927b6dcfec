//! Connection pool module
//!
//! Bounds the number of concurrent storage connections and recycles them.
//!
//! # Components
//!
//! - `connection_pool` - `ConnectionPool` and the `PooledConnection` guard
//! - `acquisition` - `BoundedAcquirer`, the retrying front door to the pool

pub mod acquisition;
pub mod connection_pool;

pub use acquisition::{AttemptBudget, BoundedAcquirer, RetryPolicy};
pub use connection_pool::{ConnectionPool, PooledConnection};
