//! Rust Transfer Engine server
//!
//! Serves account balance queries and money transfers over HTTP.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- --driver memory
//! cargo run -- --config ledger.toml
//! cargo run -- --config ledger.toml --bind 0.0.0.0:8080 --seed accounts.csv --debug
//! ```
//!
//! Without `--seed` (or `database.seed_file`) a fresh store is seeded with a
//! fixed set of demo accounts. Rows that already exist are never overwritten.
//!
//! # Exit Codes
//!
//! - 0: Clean shutdown after Ctrl-C or SIGTERM
//! - 1: Error (bad config, unreadable seed file, address in use, etc.)

use anyhow::{Context, Result};
use rust_transfer_engine::config::{AppConfig, Driver};
use rust_transfer_engine::io::read_accounts_csv;
use rust_transfer_engine::pool::{BoundedAcquirer, ConnectionPool, RetryPolicy};
use rust_transfer_engine::store::{demo_accounts, ConnectionFactory, MemoryStore, PgConnector};
use rust_transfer_engine::{cli, http, logging, TransferCoordinator};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse_args();
    logging::init_tracing(args.debug)?;

    let config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => {
            tracing::info!("no config file given, using defaults");
            AppConfig::default()
        }
    };
    let config = args.apply_overrides(config);
    config.validate()?;

    let seed = match &config.database.seed_file {
        Some(path) => read_accounts_csv(path).map_err(anyhow::Error::msg)?,
        None => demo_accounts(),
    };

    match config.database.driver {
        Driver::Memory => run(MemoryStore::with_accounts(seed), &config).await,
        Driver::Postgres => {
            let connector = PgConnector::new(&config.database)
                .context("Invalid database connection settings")?;
            // The server still starts if the table is already there but
            // bootstrap fails for another reason.
            if let Err(e) = connector.bootstrap(&seed).await {
                tracing::error!(error = %e, "can not create account table");
            }
            run(connector, &config).await
        }
    }
}

async fn run<F: ConnectionFactory>(factory: F, config: &AppConfig) -> Result<()> {
    let pool = Arc::new(ConnectionPool::new(factory, config.pool.max_resources));
    let acquirer = BoundedAcquirer::new(Arc::clone(&pool), RetryPolicy::from(&config.pool));
    let coordinator = Arc::new(TransferCoordinator::new(acquirer));

    let listener = TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!(
        bind = %config.server.bind,
        driver = ?config.database.driver,
        max_resources = config.pool.max_resources,
        "server listening"
    );

    let served = axum::serve(listener, http::router(coordinator))
        .with_graceful_shutdown(http::shutdown_signal())
        .await;

    pool.shutdown().await;
    served.context("HTTP server failed")?;
    tracing::info!("server shutdown complete");
    Ok(())
}
