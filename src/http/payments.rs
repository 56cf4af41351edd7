use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::domain::{PaymentMethod, PaymentStatus};
use crate::error::{AppError, Result};
use crate::gateway::CallbackProvider;
use crate::http::{validate, AppState};
use crate::reconcile::{InitiateRequest, PaymentView};

#[derive(Debug, Deserialize, Validate)]
pub struct InitializePaymentRequest {
    pub user_id: Uuid,
    pub order_id: Uuid,
    #[validate(range(min = 1, message = "amount must be greater than zero"))]
    pub amount: i64,
    pub method: Option<PaymentMethod>,
    pub phone: Option<String>,
}

pub async fn initialize(
    State(s): State<AppState>,
    Json(r): Json<InitializePaymentRequest>,
) -> Result<Json<serde_json::Value>> {
    validate(&r)?;
    let initiated = s
        .reconciler
        .initiate(InitiateRequest {
            user_id: r.user_id,
            order_id: r.order_id,
            amount: r.amount,
            method: r.method,
            phone: r.phone,
        })
        .await?;
    Ok(Json(json!({
        "message": "Payment initialized successfully",
        "payment_id": initiated.payment_id,
        "transaction_id": initiated.reference,
        "payment_url": initiated.redirect_url,
    })))
}

pub async fn verify(
    State(s): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Response> {
    let view: PaymentView = s.reconciler.verify(&transaction_id).await?;
    let code = if view.status == PaymentStatus::Completed {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    Ok((code, Json(view)).into_response())
}

/// Always acknowledged so the provider stops retrying payloads it will never
/// fix; the applied/no-op/invalid distinction is internal.
pub async fn callback(
    State(s): State<AppState>,
    Path(provider): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>> {
    let provider = CallbackProvider::parse(&provider).ok_or(AppError::NotFound("provider"))?;
    let outcome = s.reconciler.apply_callback(provider, &payload).await?;
    Ok(Json(json!({
        "message": "Payment callback received",
        "outcome": outcome.as_str(),
    })))
}

pub async fn status(
    State(s): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<PaymentView>> {
    Ok(Json(s.reconciler.status(&transaction_id).await?))
}

pub async fn methods(State(s): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "methods": ["card", "account", "ussd", "mpesa"],
        "default_method": "card",
        "environment": s.gateway_environment,
    }))
}
