//! Retrying connection acquisition
//!
//! [`BoundedAcquirer`] wraps [`ConnectionPool::acquire`] with two independent
//! retry budgets: one for attempts that timed out waiting for a slot, one for
//! attempts that got a slot but failed to open a new connection. A mix of
//! transient timeouts and transient connect failures can therefore each use up
//! their own budget before the acquisition gives up.
//!
//! This is the only way the coordinator obtains a connection.

use crate::config::PoolConfig;
use crate::pool::connection_pool::{ConnectionPool, PooledConnection};
use crate::store::ConnectionFactory;
use crate::types::{LedgerError, PoolError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Retry configuration for [`BoundedAcquirer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Budget of failed attempts, applied separately to each failure cause
    pub max_attempts: u32,
    /// How long a single attempt waits for a free slot
    pub max_wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, max_wait: Duration) -> Self {
        Self {
            max_attempts,
            max_wait,
        }
    }
}

impl From<&PoolConfig> for RetryPolicy {
    fn from(config: &PoolConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.max_wait_millis),
        )
    }
}

/// Counter of failed attempts for one failure cause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptBudget {
    used: u32,
    max: u32,
}

impl AttemptBudget {
    pub fn new(max: u32) -> Self {
        Self { used: 0, max }
    }

    /// Failed attempts recorded so far
    pub fn used(&self) -> u32 {
        self.used
    }

    /// Failures still allowed before the budget is spent
    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.used)
    }

    /// Record one failure and report whether the budget is now spent
    pub fn record_failure(&mut self) -> bool {
        self.used = self.used.saturating_add(1);
        self.used >= self.max
    }
}

/// Pool acquisition with bounded, per-cause retries
pub struct BoundedAcquirer<F: ConnectionFactory> {
    pool: Arc<ConnectionPool<F>>,
    policy: RetryPolicy,
}

impl<F: ConnectionFactory> BoundedAcquirer<F> {
    pub fn new(pool: Arc<ConnectionPool<F>>, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    /// The pool connections are taken from
    pub fn pool(&self) -> &Arc<ConnectionPool<F>> {
        &self.pool
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Check out a connection, retrying transient failures
    ///
    /// Each attempt waits at most `max_wait` for a slot. The first success
    /// returns immediately.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::AcquisitionTimeout`] once `max_attempts` attempts
    ///   timed out
    /// - [`LedgerError::ResourceCreation`] once `max_attempts` attempts failed
    ///   to open a connection
    /// - [`LedgerError::PoolClosed`] if the pool was shut down
    pub async fn acquire(&self) -> Result<PooledConnection<F::Connection>, LedgerError> {
        let mut timeouts = AttemptBudget::new(self.policy.max_attempts);
        let mut creation_failures = AttemptBudget::new(self.policy.max_attempts);

        loop {
            debug!(
                timeout_attempt = timeouts.used() + 1,
                creation_attempt = creation_failures.used() + 1,
                max_attempts = self.policy.max_attempts,
                "acquiring connection"
            );

            match self.pool.acquire(self.policy.max_wait).await {
                Ok(conn) => return Ok(conn),
                Err(PoolError::Timeout { waited }) => {
                    warn!(
                        waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                        remaining = timeouts.remaining().saturating_sub(1),
                        "no free connection"
                    );
                    if timeouts.record_failure() {
                        return Err(LedgerError::AcquisitionTimeout {
                            attempts: timeouts.used(),
                            waited,
                        });
                    }
                }
                Err(PoolError::Creation(source)) => {
                    error!(
                        error = %source,
                        remaining = creation_failures.remaining().saturating_sub(1),
                        "can not create connection"
                    );
                    if creation_failures.record_failure() {
                        return Err(LedgerError::ResourceCreation {
                            attempts: creation_failures.used(),
                            source,
                        });
                    }
                }
                Err(PoolError::Closed) => return Err(LedgerError::PoolClosed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Account;
    use rstest::rstest;
    use std::time::Instant;

    fn acquirer(
        max_size: usize,
        max_attempts: u32,
        max_wait: Duration,
    ) -> (MemoryStore, BoundedAcquirer<MemoryStore>) {
        let store = MemoryStore::with_accounts([Account::new(1, 100.0)]);
        let pool = Arc::new(ConnectionPool::new(store.clone(), max_size));
        (
            store,
            BoundedAcquirer::new(pool, RetryPolicy::new(max_attempts, max_wait)),
        )
    }

    #[rstest]
    #[case::single_attempt(1, 1, true)]
    #[case::first_of_three(3, 1, false)]
    #[case::last_of_three(3, 3, true)]
    #[case::zero_budget(0, 1, true)]
    fn test_attempt_budget(#[case] max: u32, #[case] failures: u32, #[case] spent: bool) {
        let mut budget = AttemptBudget::new(max);
        let mut last = false;
        for _ in 0..failures {
            last = budget.record_failure();
        }
        assert_eq!(last, spent);
        assert_eq!(budget.used(), failures);
    }

    #[test]
    fn test_retry_policy_from_pool_config() {
        let config = PoolConfig {
            max_resources: 4,
            max_wait_millis: 250,
            max_attempts: 5,
        };
        assert_eq!(
            RetryPolicy::from(&config),
            RetryPolicy::new(5, Duration::from_millis(250))
        );
    }

    #[tokio::test]
    async fn test_transient_creation_failures_are_retried() {
        let (store, acquirer) = acquirer(1, 3, Duration::from_millis(100));
        store.refuse_next_connects(2);

        assert!(acquirer.acquire().await.is_ok());
        assert_eq!(store.connections_opened(), 1);
    }

    #[tokio::test]
    async fn test_creation_budget_exhausted() {
        let (store, acquirer) = acquirer(1, 3, Duration::from_millis(100));
        store.refuse_next_connects(3);

        let result = acquirer.acquire().await;
        assert!(matches!(
            result,
            Err(LedgerError::ResourceCreation { attempts: 3, .. })
        ));
        assert_eq!(acquirer.pool().in_use(), 0);
    }

    #[tokio::test]
    async fn test_timeout_budget_exhausted() {
        let (_store, acquirer) = acquirer(1, 2, Duration::from_millis(30));
        let _held = acquirer.acquire().await.unwrap();

        let started = Instant::now();
        let result = acquirer.acquire().await;

        assert!(matches!(
            result,
            Err(LedgerError::AcquisitionTimeout { attempts: 2, .. })
        ));
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_failure_causes_use_separate_budgets() {
        // One timeout and one creation failure with a budget of two each:
        // a shared counter would give up, separate counters succeed.
        let (store, acquirer) = acquirer(1, 2, Duration::from_millis(50));
        let mut held = acquirer.acquire().await.unwrap();
        held.mark_broken();
        store.refuse_next_connects(1);

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(75)).await;
            drop(held);
        });

        let result = acquirer.acquire().await;
        releaser.await.unwrap();

        assert!(result.is_ok());
        assert_eq!(store.connections_opened(), 2);
    }

    #[tokio::test]
    async fn test_closed_pool_is_not_retried() {
        let (_store, acquirer) = acquirer(1, 3, Duration::from_millis(50));
        acquirer.pool().shutdown().await;

        assert!(matches!(
            acquirer.acquire().await,
            Err(LedgerError::PoolClosed)
        ));
    }
}
