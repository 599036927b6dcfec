//! In-memory transactional account store
//!
//! `MemoryStore` is a small storage engine with the two properties the
//! transfer protocol relies on:
//!
//! - **Exclusive row locks**: a locking read takes the row's lock and the
//!   connection keeps it until commit, rollback, close or drop. A second
//!   transaction asking for the same row waits.
//! - **Transactional writes**: writes are staged on the connection and only
//!   become visible to other connections on commit.
//!
//! It backs the `memory` driver and every test in the crate. For tests it can
//! also inject faults (refused connects, failing rows, failing commits and
//! rollbacks) and hold each freshly acquired row lock for a fixed delay, which
//! widens the window in which concurrent transfers can interleave.

use crate::store::traits::{ConnectionFactory, LedgerConnection};
use crate::types::{Account, AccountId, StoreError};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// One account row: committed balance plus its exclusive lock
#[derive(Debug)]
struct Row {
    /// `f64` bits of the committed balance
    committed: AtomicU64,
    lock: Arc<Mutex<()>>,
}

impl Row {
    fn new(amount: f64) -> Self {
        Row {
            committed: AtomicU64::new(amount.to_bits()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn amount(&self) -> f64 {
        f64::from_bits(self.committed.load(Ordering::Acquire))
    }

    fn set_amount(&self, amount: f64) {
        self.committed.store(amount.to_bits(), Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct Faults {
    refused_connects: AtomicUsize,
    failing_accounts: DashSet<AccountId>,
    failing_commits: AtomicBool,
    failing_rollbacks: AtomicBool,
}

#[derive(Debug, Default)]
struct Shared {
    rows: DashMap<AccountId, Arc<Row>>,
    lock_delay_micros: AtomicU64,
    faults: Faults,
    connections_opened: AtomicUsize,
}

impl Shared {
    // Clones the Arc so no map shard stays borrowed across an await.
    fn row(&self, account_id: AccountId) -> Option<Arc<Row>> {
        self.rows
            .get(&account_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn lock_delay(&self) -> Duration {
        Duration::from_micros(self.lock_delay_micros.load(Ordering::Relaxed))
    }
}

/// Shared handle to an in-memory account table
///
/// Cloning the handle is cheap; all clones see the same rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-filled with the given accounts
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let store = Self::new();
        for account in accounts {
            store.insert_account(account);
        }
        store
    }

    /// Insert a row, replacing any committed balance for the same id
    pub fn insert_account(&self, account: Account) {
        match self.shared.row(account.account_id) {
            Some(row) => row.set_amount(account.amount),
            None => {
                self.shared
                    .rows
                    .insert(account.account_id, Arc::new(Row::new(account.amount)));
            }
        }
    }

    /// Committed balance of an account
    pub fn balance(&self, account_id: AccountId) -> Option<f64> {
        self.shared.row(account_id).map(|row| row.amount())
    }

    /// Committed snapshot of all accounts, sorted by id
    pub fn accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self
            .shared
            .rows
            .iter()
            .map(|entry| Account::new(*entry.key(), entry.value().amount()))
            .collect();
        accounts.sort_by_key(|account| account.account_id);
        accounts
    }

    /// Number of connections successfully opened so far
    pub fn connections_opened(&self) -> usize {
        self.shared.connections_opened.load(Ordering::SeqCst)
    }

    /// Hold every newly acquired row lock for `delay` before returning
    pub fn set_lock_delay(&self, delay: Duration) {
        let micros = u64::try_from(delay.as_micros()).unwrap_or(u64::MAX);
        self.shared.lock_delay_micros.store(micros, Ordering::Relaxed);
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_next_connects(&self, count: usize) {
        self.shared
            .faults
            .refused_connects
            .store(count, Ordering::SeqCst);
    }

    /// Make every read and write touching `account_id` fail
    pub fn fail_operations_on(&self, account_id: AccountId) {
        self.shared.faults.failing_accounts.insert(account_id);
    }

    /// Undo [`fail_operations_on`](Self::fail_operations_on)
    pub fn restore_operations_on(&self, account_id: AccountId) {
        self.shared.faults.failing_accounts.remove(&account_id);
    }

    /// Make every commit fail while `enabled`
    pub fn fail_commits(&self, enabled: bool) {
        self.shared
            .faults
            .failing_commits
            .store(enabled, Ordering::SeqCst);
    }

    /// Make every rollback fail while `enabled`
    pub fn fail_rollbacks(&self, enabled: bool) {
        self.shared
            .faults
            .failing_rollbacks
            .store(enabled, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionFactory for MemoryStore {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, StoreError> {
        let refused = self
            .shared
            .faults
            .refused_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(StoreError::ConnectionRefused(
                "in-memory store refused the connection".to_string(),
            ));
        }

        let id = self
            .shared
            .connections_opened
            .fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            id,
            shared: Arc::clone(&self.shared),
            held: HashMap::new(),
            staged: HashMap::new(),
            closed: false,
        })
    }
}

/// A session against a [`MemoryStore`]
///
/// Dropping the connection releases every row lock it holds and discards
/// uncommitted writes, like a database does for a dropped session.
#[derive(Debug)]
pub struct MemoryConnection {
    id: usize,
    shared: Arc<Shared>,
    held: HashMap<AccountId, OwnedMutexGuard<()>>,
    staged: HashMap<AccountId, f64>,
    closed: bool,
}

impl MemoryConnection {
    fn check(&self, account_id: AccountId) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        if self.shared.faults.failing_accounts.contains(&account_id) {
            return Err(StoreError::Unavailable(format!(
                "account {} is unavailable",
                account_id
            )));
        }
        Ok(())
    }

    // Read-your-writes inside the open transaction.
    fn visible_amount(&self, account_id: AccountId, row: &Row) -> f64 {
        self.staged
            .get(&account_id)
            .copied()
            .unwrap_or_else(|| row.amount())
    }

    fn end_transaction(&mut self) {
        self.staged.clear();
        self.held.clear();
    }
}

#[async_trait]
impl LedgerConnection for MemoryConnection {
    async fn fetch_amount(&mut self, account_id: AccountId) -> Result<Option<f64>, StoreError> {
        self.check(account_id)?;
        Ok(self
            .shared
            .row(account_id)
            .map(|row| self.visible_amount(account_id, &row)))
    }

    async fn fetch_amount_for_update(
        &mut self,
        account_id: AccountId,
    ) -> Result<Option<f64>, StoreError> {
        self.check(account_id)?;
        let Some(row) = self.shared.row(account_id) else {
            return Ok(None);
        };

        if !self.held.contains_key(&account_id) {
            let guard = Arc::clone(&row.lock).lock_owned().await;
            trace!(connection = self.id, account_id, "row lock acquired");
            self.held.insert(account_id, guard);

            let delay = self.shared.lock_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(Some(self.visible_amount(account_id, &row)))
    }

    async fn store_amount(&mut self, account_id: AccountId, amount: f64) -> Result<(), StoreError> {
        self.check(account_id)?;
        if !self.held.contains_key(&account_id) {
            return Err(StoreError::RowNotLocked(account_id));
        }
        self.staged.insert(account_id, amount);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        if self.shared.faults.failing_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commit rejected".to_string()));
        }

        for (account_id, amount) in self.staged.drain() {
            match self.shared.row(account_id) {
                Some(row) => row.set_amount(amount),
                None => return Err(StoreError::RowNotFound(account_id)),
            }
        }
        self.held.clear();
        trace!(connection = self.id, "transaction committed");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        // A failed rollback leaves the locks in place until the session goes away.
        if self.shared.faults.failing_rollbacks.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("rollback rejected".to_string()));
        }

        self.end_transaction();
        trace!(connection = self.id, "transaction rolled back");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        !self.held.is_empty() || !self.staged.is_empty()
    }

    async fn close(mut self) -> Result<(), StoreError> {
        self.closed = true;
        self.end_transaction();
        Ok(())
    }
}
