//! Bounded pool of reusable storage connections
//!
//! # Design
//!
//! ```text
//! ConnectionPool
//!     ├── permits: Semaphore(max_size)   ← admission control, FIFO
//!     ├── idle: SegQueue<Connection>     ← returned, ready to reuse
//!     └── factory: ConnectionFactory     ← opens new connections
//! ```
//!
//! A caller first waits for a permit, then takes an idle connection or opens a
//! new one. The permit travels with the connection inside a
//! [`PooledConnection`] guard and is released when the guard drops, so the
//! number of checked-out connections never exceeds `max_size`.
//!
//! # Fairness
//!
//! `tokio::sync::Semaphore` grants permits in the order they were requested,
//! so contended callers are served first-in-first-out.

use crate::store::{ConnectionFactory, LedgerConnection};
use crate::types::PoolError;
use crossbeam_queue::SegQueue;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Bounded, thread-safe pool of storage connections
///
/// Share it across tasks with `Arc<ConnectionPool<F>>`. All methods take
/// `&self`.
pub struct ConnectionPool<F: ConnectionFactory> {
    factory: F,
    max_size: usize,
    permits: Arc<Semaphore>,
    idle: Arc<SegQueue<F::Connection>>,
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Create a pool that hands out at most `max_size` connections at once
    ///
    /// No connection is opened until the first [`acquire`](Self::acquire).
    pub fn new(factory: F, max_size: usize) -> Self {
        Self {
            factory,
            max_size,
            permits: Arc::new(Semaphore::new(max_size)),
            idle: Arc::new(SegQueue::new()),
        }
    }

    /// Maximum number of connections checked out at once
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of connections currently checked out
    pub fn in_use(&self) -> usize {
        self.max_size
            .saturating_sub(self.permits.available_permits())
    }

    /// Number of idle connections waiting to be reused
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// The factory new connections are opened with
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Check out a connection, waiting at most `timeout` for a free slot
    ///
    /// Reuses an idle connection when there is one and opens a new one
    /// otherwise.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Timeout`] if no slot became free within `timeout`
    /// - [`PoolError::Creation`] if opening a new connection failed; the slot
    ///   has been released again before this is returned
    /// - [`PoolError::Closed`] after [`shutdown`](Self::shutdown)
    pub async fn acquire(
        &self,
        timeout: Duration,
    ) -> Result<PooledConnection<F::Connection>, PoolError> {
        let permit =
            match tokio::time::timeout(timeout, Arc::clone(&self.permits).acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(PoolError::Closed),
                Err(_) => return Err(PoolError::Timeout { waited: timeout }),
            };

        let conn = match self.idle.pop() {
            Some(conn) => conn,
            // `permit` is dropped on the error path, freeing the slot.
            None => self.factory.connect().await.map_err(PoolError::Creation)?,
        };

        debug!(in_use = self.in_use(), idle = self.idle_count(), "connection checked out");
        Ok(PooledConnection {
            conn: Some(conn),
            idle: Arc::clone(&self.idle),
            permits: Arc::clone(&self.permits),
            broken: false,
            _permit: permit,
        })
    }

    /// Return a connection to the pool
    ///
    /// Equivalent to dropping the guard.
    pub fn release(&self, conn: PooledConnection<F::Connection>) {
        drop(conn);
    }

    /// Stop handing out connections and close every idle one
    ///
    /// Callers waiting in [`acquire`](Self::acquire) fail with
    /// [`PoolError::Closed`]. Connections still checked out are dropped
    /// instead of recycled when they come back. Close failures are logged and
    /// do not stop the remaining connections from being closed.
    pub async fn shutdown(&self) {
        self.permits.close();

        let mut closed = 0usize;
        while let Some(conn) = self.idle.pop() {
            match conn.close().await {
                Ok(()) => closed += 1,
                Err(e) => warn!(error = %e, "can not close connection"),
            }
        }
        info!(closed, in_use = self.in_use(), "connection pool shut down");
    }
}

/// A connection checked out of a [`ConnectionPool`]
///
/// Dereferences to the underlying connection. Dropping the guard puts the
/// connection back into the idle set and then releases its slot, whatever
/// the outcome of the work done with it. A connection that is broken or
/// still inside a transaction is discarded instead of recycled.
pub struct PooledConnection<C: LedgerConnection> {
    conn: Option<C>,
    idle: Arc<SegQueue<C>>,
    permits: Arc<Semaphore>,
    broken: bool,
    // Dropped after `Drop::drop` runs, i.e. after the connection is back.
    _permit: OwnedSemaphorePermit,
}

impl<F: ConnectionFactory> fmt::Debug for ConnectionPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_size", &self.max_size)
            .field("in_use", &self.in_use())
            .field("idle", &self.idle_count())
            .finish()
    }
}

impl<C: LedgerConnection> PooledConnection<C> {
    /// Do not recycle this connection when it is released
    ///
    /// Used after a storage failure that may have left the session unusable.
    /// The slot is still released.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Whether [`mark_broken`](Self::mark_broken) was called
    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

impl<C: LedgerConnection> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn
            .as_ref()
            .expect("connection is present until the guard is dropped")
    }
}

impl<C: LedgerConnection> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn
            .as_mut()
            .expect("connection is present until the guard is dropped")
    }
}

impl<C: LedgerConnection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        if self.broken {
            warn!("discarding broken connection instead of recycling it");
        } else if conn.in_transaction() {
            // The holder went away mid-transaction, e.g. its future was
            // cancelled. Dropping the session releases its locks and writes.
            warn!("discarding connection with an open transaction");
        } else if self.permits.is_closed() {
            debug!("pool is shut down, dropping returned connection");
        } else {
            self.idle.push(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Account;
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(2);

    fn pool(max_size: usize) -> (MemoryStore, Arc<ConnectionPool<MemoryStore>>) {
        let store = MemoryStore::with_accounts([Account::new(1, 100.0)]);
        let pool = Arc::new(ConnectionPool::new(store.clone(), max_size));
        (store, pool)
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let (store, pool) = pool(2);

        let conn = pool.acquire(WAIT).await.unwrap();
        assert_eq!(pool.in_use(), 1);
        pool.release(conn);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.idle_count(), 1);

        let _conn = pool.acquire(WAIT).await.unwrap();
        assert_eq!(store.connections_opened(), 1);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_acquire_beyond_max_times_out() {
        let (_store, pool) = pool(2);

        let _first = pool.acquire(WAIT).await.unwrap();
        let _second = pool.acquire(WAIT).await.unwrap();

        let result = pool.acquire(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(PoolError::Timeout { .. })));
        assert_eq!(pool.in_use(), 2);
    }

    #[tokio::test]
    async fn test_creation_failure_releases_slot() {
        let (store, pool) = pool(1);
        store.refuse_next_connects(1);

        let result = pool.acquire(WAIT).await;
        assert!(matches!(result, Err(PoolError::Creation(_))));
        assert_eq!(pool.in_use(), 0);

        // The only slot must be free again.
        let conn = pool.acquire(Duration::from_millis(50)).await;
        assert!(conn.is_ok());
    }

    #[tokio::test]
    async fn test_blocked_waiter_is_unblocked_by_release() {
        let (_store, pool) = pool(1);
        let held = pool.acquire(WAIT).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(WAIT).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_waiters_are_served_in_arrival_order() {
        let (_store, pool) = pool(1);
        let held = pool.acquire(WAIT).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut waiters = Vec::new();
        for index in 0..3 {
            let pool = Arc::clone(&pool);
            let tx = tx.clone();
            waiters.push(tokio::spawn(async move {
                let conn = pool.acquire(WAIT).await.unwrap();
                tx.send(index).unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
                drop(conn);
            }));
            // Let this waiter enqueue before the next one arrives.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        drop(tx);

        drop(held);
        for waiter in waiters {
            waiter.await.unwrap();
        }

        let mut order = Vec::new();
        while let Some(index) = rx.recv().await {
            order.push(index);
        }
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_broken_connection_is_not_recycled() {
        let (store, pool) = pool(1);

        let mut conn = pool.acquire(WAIT).await.unwrap();
        conn.mark_broken();
        assert!(conn.is_broken());
        drop(conn);

        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.in_use(), 0);

        let _conn = pool.acquire(WAIT).await.unwrap();
        assert_eq!(store.connections_opened(), 2);
    }

    #[tokio::test]
    async fn test_connection_with_open_transaction_is_not_recycled() {
        let (store, pool) = pool(1);

        let mut conn = pool.acquire(WAIT).await.unwrap();
        conn.fetch_amount_for_update(1).await.unwrap();
        conn.store_amount(1, 0.0).await.unwrap();
        assert!(conn.in_transaction());
        drop(conn);

        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.in_use(), 0);

        // The abandoned write is gone and its row lock with it.
        let mut conn = pool.acquire(WAIT).await.unwrap();
        let amount = tokio::time::timeout(WAIT, conn.fetch_amount_for_update(1))
            .await
            .expect("row lock of the dropped session was released")
            .unwrap();
        assert_eq!(amount, Some(100.0));
        conn.rollback().await.unwrap();
        assert!(!conn.in_transaction());
        drop(conn);

        assert_eq!(pool.idle_count(), 1);
        assert_eq!(store.connections_opened(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connections_and_rejects_acquire() {
        let (_store, pool) = pool(2);

        let first = pool.acquire(WAIT).await.unwrap();
        let second = pool.acquire(WAIT).await.unwrap();
        drop(first);
        assert_eq!(pool.idle_count(), 1);

        pool.shutdown().await;
        assert_eq!(pool.idle_count(), 0);

        // Returned after shutdown: dropped, not recycled.
        drop(second);
        assert_eq!(pool.idle_count(), 0);

        assert!(matches!(pool.acquire(WAIT).await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn test_concurrent_checkouts_never_exceed_max() {
        let (_store, pool) = pool(3);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut tasks = Vec::new();
        for _ in 0..12 {
            let pool = Arc::clone(&pool);
            let tx = tx.clone();
            tasks.push(tokio::spawn(async move {
                let conn = pool.acquire(WAIT).await.unwrap();
                tx.send(pool.in_use()).unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
                drop(conn);
            }));
        }
        drop(tx);
        for task in tasks {
            task.await.unwrap();
        }

        while let Some(in_use) = rx.recv().await {
            assert!(in_use <= 3, "{} connections checked out", in_use);
        }
    }
}
