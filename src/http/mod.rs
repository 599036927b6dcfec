//! HTTP transport
//!
//! A thin `axum` layer over [`TransferCoordinator`]:
//!
//! - `GET /health`
//! - `GET /accounts/{id}` returns `{"accountId": 1, "amount": 500.0}`
//! - `POST /transfers` takes `{"fromAccountId": 1, "toAccountId": 2, "sum": 10.0}`

pub mod error;

pub use error::ApiError;

use crate::core::TransferCoordinator;
use crate::store::ConnectionFactory;
use crate::types::{Account, AccountId, TransferRequest};
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;

/// Body returned by a successful transfer
pub const TRANSFER_OK: &str = "Operation was finished successfully!";

/// Build the router for a coordinator
pub fn router<F: ConnectionFactory>(coordinator: Arc<TransferCoordinator<F>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/accounts/{id}", get(get_account::<F>))
        .route("/transfers", post(transfer::<F>))
        .with_state(coordinator)
}

/// GET /health
async fn health() -> &'static str {
    "ok"
}

/// GET /accounts/{id}
async fn get_account<F: ConnectionFactory>(
    State(coordinator): State<Arc<TransferCoordinator<F>>>,
    id: Result<Path<AccountId>, PathRejection>,
) -> Result<Json<Account>, ApiError> {
    let Path(account_id) = id.map_err(|e| ApiError::Validation(e.body_text()))?;

    let account = coordinator.get_account_by_id(account_id).await?;
    tracing::info!(%account, "account read");
    Ok(Json(account))
}

/// POST /transfers
async fn transfer<F: ConnectionFactory>(
    State(coordinator): State<Arc<TransferCoordinator<F>>>,
    payload: Result<Json<TransferRequest>, JsonRejection>,
) -> Result<&'static str, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;
    request.validate().map_err(ApiError::Validation)?;

    tracing::info!(%request, "transfer requested");
    coordinator
        .transfer(request.from_account_id, request.to_account_id, request.sum)
        .await?;
    Ok(TRANSFER_OK)
}

/// Resolve on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "can not listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "can not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, starting shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, starting shutdown"),
    }
}
