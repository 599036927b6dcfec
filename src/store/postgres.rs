//! PostgreSQL backend
//!
//! Each pooled connection is a single `sqlx::PgConnection`, not an `sqlx`
//! pool: pooling, admission control and retries are done by
//! [`ConnectionPool`](crate::pool::ConnectionPool).
//!
//! Transactions run at READ COMMITTED. A transaction that waits on a
//! `FOR UPDATE` lock reads the holder's committed balance once the lock is
//! granted, which is what the locked read-modify-write in the repository
//! needs.

use crate::config::DatabaseConfig;
use crate::store::traits::{ConnectionFactory, LedgerConnection};
use crate::types::{Account, AccountId, StoreError};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Row};
use std::str::FromStr;
use tracing::{debug, info};

// `amount` may be a `real` column; widen it so it always decodes as f64.
const SELECT_AMOUNT: &str = "SELECT amount::float8 AS amount FROM account WHERE id = $1";
const SELECT_AMOUNT_FOR_UPDATE: &str =
    "SELECT amount::float8 AS amount FROM account WHERE id = $1 FOR UPDATE";
const UPDATE_AMOUNT: &str = "UPDATE account SET amount = $2 WHERE id = $1";
const CREATE_ACCOUNT_TABLE: &str = r#"CREATE TABLE IF NOT EXISTS account (
    id BIGINT NOT NULL PRIMARY KEY,
    amount DOUBLE PRECISION NOT NULL
)"#;
const INSERT_ACCOUNT: &str = "INSERT INTO account (id, amount) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING";

/// Opens connections to the configured PostgreSQL database
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    /// Build connect options from the database section of the config
    ///
    /// `user` and `password` override whatever the URL carries.
    pub fn new(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut options = PgConnectOptions::from_str(&config.url)?;
        if !config.user.is_empty() {
            options = options.username(&config.user);
        }
        if !config.password.is_empty() {
            options = options.password(&config.password);
        }
        Ok(Self { options })
    }

    /// Create the account table if missing and insert absent seed rows
    ///
    /// Existing rows are never overwritten.
    pub async fn bootstrap(&self, accounts: &[Account]) -> Result<(), StoreError> {
        let mut conn = PgConnection::connect_with(&self.options).await?;

        sqlx::query(CREATE_ACCOUNT_TABLE).execute(&mut conn).await?;
        let mut inserted = 0u64;
        for account in accounts {
            inserted += sqlx::query(INSERT_ACCOUNT)
                .bind(account.account_id)
                .bind(account.amount)
                .execute(&mut conn)
                .await?
                .rows_affected();
        }

        info!(seeded = inserted, offered = accounts.len(), "account table ready");
        conn.close().await?;
        Ok(())
    }
}

#[async_trait]
impl ConnectionFactory for PgConnector {
    type Connection = PgLedgerConnection;

    async fn connect(&self) -> Result<PgLedgerConnection, StoreError> {
        let conn = PgConnection::connect_with(&self.options).await?;
        debug!("opened PostgreSQL connection");
        Ok(PgLedgerConnection {
            conn,
            in_transaction: false,
        })
    }
}

/// A PostgreSQL session with auto-commit disabled
///
/// `BEGIN` is sent lazily before the first locking read, so plain reads
/// outside a transaction do not leave the session idle in transaction.
#[derive(Debug)]
pub struct PgLedgerConnection {
    conn: PgConnection,
    in_transaction: bool,
}

impl PgLedgerConnection {
    async fn begin_if_needed(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            sqlx::query("BEGIN ISOLATION LEVEL READ COMMITTED")
                .execute(&mut self.conn)
                .await?;
            self.in_transaction = true;
        }
        Ok(())
    }

    async fn end_transaction(&mut self, statement: &'static str) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Ok(());
        }
        // The transaction is over either way once the statement was sent.
        self.in_transaction = false;
        sqlx::query(statement).execute(&mut self.conn).await?;
        Ok(())
    }

    async fn select_amount(
        &mut self,
        query: &'static str,
        account_id: AccountId,
    ) -> Result<Option<f64>, StoreError> {
        let row = sqlx::query(query)
            .bind(account_id)
            .fetch_optional(&mut self.conn)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get::<f64, _>("amount")?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl LedgerConnection for PgLedgerConnection {
    async fn fetch_amount(&mut self, account_id: AccountId) -> Result<Option<f64>, StoreError> {
        self.select_amount(SELECT_AMOUNT, account_id).await
    }

    async fn fetch_amount_for_update(
        &mut self,
        account_id: AccountId,
    ) -> Result<Option<f64>, StoreError> {
        self.begin_if_needed().await?;
        self.select_amount(SELECT_AMOUNT_FOR_UPDATE, account_id)
            .await
    }

    async fn store_amount(&mut self, account_id: AccountId, amount: f64) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::RowNotLocked(account_id));
        }

        let updated = sqlx::query(UPDATE_AMOUNT)
            .bind(account_id)
            .bind(amount)
            .execute(&mut self.conn)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(StoreError::RowNotFound(account_id));
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.end_transaction("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.end_transaction("ROLLBACK").await
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn close(self) -> Result<(), StoreError> {
        self.conn.close().await?;
        Ok(())
    }
}
