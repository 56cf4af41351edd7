//! HTTP surface: route table and shared state.

pub mod carts;
pub mod orders;
pub mod payments;
pub mod products;
pub mod users;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::{Json, Router};

use crate::error::AppError;
use crate::events::EventPublisher;
use crate::reconcile::Reconciler;
use crate::store::PgStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<PgStore>,
    pub reconciler: Arc<Reconciler>,
    pub events: EventPublisher,
    pub gateway_environment: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/users", post(users::create_user))
        .route("/api/users/:id", get(users::get_user))
        .route("/api/products", get(products::list_products).post(products::create_product))
        .route("/api/products/:id", get(products::get_product).put(products::update_product))
        .route(
            "/api/cart/:user_id",
            get(carts::get_cart).put(carts::put_cart).delete(carts::clear_cart),
        )
        .route("/api/cart/:user_id/merge", post(carts::merge_cart))
        .route("/api/orders", get(orders::list_orders).post(orders::create_order))
        .route("/api/orders/:id", get(orders::get_order))
        .route("/api/orders/:id/status", put(orders::update_status))
        .route("/api/orders/:id/cancel", post(orders::cancel_order))
        .route("/api/payments/initialize", post(payments::initialize))
        .route("/api/payments/verify/:transaction_id", get(payments::verify))
        .route("/api/payments/callback/:provider", post(payments::callback))
        .route("/api/payments/status/:transaction_id", get(payments::status))
        .route("/api/payments/methods", get(payments::methods))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "OK", "service": "campus-market" }))
}

pub(crate) fn validate<T: validator::Validate>(value: &T) -> Result<(), AppError> {
    value.validate().map_err(|e| AppError::InvalidInput(e.to_string()))
}
