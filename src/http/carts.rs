use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{Cart, CartItem};
use crate::error::Result;
use crate::http::AppState;

#[derive(Debug, Deserialize)]
pub struct CartBody {
    pub items: Vec<CartItem>,
}

pub async fn get_cart(State(s): State<AppState>, Path(user_id): Path<Uuid>) -> Result<Json<Cart>> {
    Ok(Json(s.store.cart(user_id).await?))
}

pub async fn put_cart(
    State(s): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(r): Json<CartBody>,
) -> Result<Json<Cart>> {
    Ok(Json(s.store.put_cart(user_id, r.items).await?))
}

pub async fn merge_cart(
    State(s): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(r): Json<CartBody>,
) -> Result<Json<Cart>> {
    Ok(Json(s.store.merge_cart(user_id, r.items).await?))
}

pub async fn clear_cart(State(s): State<AppState>, Path(user_id): Path<Uuid>) -> Result<StatusCode> {
    s.store.clear_cart(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
