//! HTTP error mapping
//!
//! Validation failures are the client's fault (400). Every engine failure is
//! a server error (500). Either way the message is the plain-text body.

use crate::types::LedgerError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// API error type with automatic HTTP status mapping
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request or a sum that is not strictly positive (400)
    Validation(String),

    /// Failure reported by the transfer engine (500)
    Ledger(LedgerError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(message) => {
                tracing::debug!(%message, "rejected request");
                (StatusCode::BAD_REQUEST, message).into_response()
            }
            Self::Ledger(err) => {
                tracing::error!(kind = %err.kind(), error = %err, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        Self::Ledger(e)
    }
}
