//! Application error taxonomy and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("payment gateway timed out")]
    GatewayTimeout,

    /// The provider declined the charge; the reason is the provider's own.
    #[error("charge rejected: {0}")]
    ChargeRejected(String),

    #[error("conflicting concurrent update")]
    Conflict,

    /// A theoretically-unreachable branch, e.g. a payment whose order is
    /// gone. Logged as an integrity violation.
    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout => Self::GatewayTimeout,
            GatewayError::Unavailable(m) | GatewayError::Protocol(m) => Self::GatewayUnavailable(m),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Conflict | StoreError::DuplicateCompletion => Self::Conflict,
            StoreError::InsufficientStock(id) => {
                Self::InvalidInput(format!("insufficient stock for product {id}"))
            }
            StoreError::InvalidState(m) => Self::InvalidInput(m),
            StoreError::Database(e) => Self::Database(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::InvalidInput(m) => (StatusCode::BAD_REQUEST, m.clone()),
            Self::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            Self::ChargeRejected(m) => (StatusCode::PAYMENT_REQUIRED, m.clone()),
            Self::Conflict => (StatusCode::CONFLICT, self.to_string()),
            Self::GatewayTimeout => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            Self::GatewayUnavailable(_) => {
                tracing::warn!(error = %self, "gateway failure");
                (StatusCode::BAD_GATEWAY, "payment gateway unavailable".to_string())
            }
            Self::InconsistentState(_) => {
                tracing::error!(error = %self, "integrity violation");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            Self::Database(_) => {
                tracing::error!(error = ?self, "database failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "server error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
