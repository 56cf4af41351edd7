use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::Product;
use crate::error::{AppError, Result};
use crate::http::{validate, AppState};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
}

pub async fn list_products(
    State(s): State<AppState>,
    Query(p): Query<ListParams>,
) -> Result<Json<PaginatedResponse<Product>>> {
    let page = p.page.unwrap_or(1).max(1);
    let per_page = p.per_page.unwrap_or(20).min(100);
    let (products, total) = s.store.list_products(page, per_page).await?;
    Ok(Json(PaginatedResponse { data: products, total, page }))
}

pub async fn get_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Product>> {
    s.store.product(id).await?.map(Json).ok_or(AppError::NotFound("product"))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    pub seller_id: Uuid,
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    pub description: Option<String>,
    #[validate(range(min = 0, message = "price cannot be negative"))]
    pub price: i64,
    pub currency: Option<String>,
    #[validate(range(min = 0, message = "stock cannot be negative"))]
    pub stock: Option<i32>,
}

pub async fn create_product(
    State(s): State<AppState>,
    Json(r): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>)> {
    validate(&r)?;
    let product = s
        .store
        .create_product(
            r.seller_id,
            &r.name,
            r.description.as_deref(),
            r.price,
            r.currency.as_deref().unwrap_or("KES"),
            r.stock.unwrap_or(0),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(product)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    pub description: Option<String>,
    #[validate(range(min = 0, message = "price cannot be negative"))]
    pub price: i64,
    #[validate(range(min = 0, message = "stock cannot be negative"))]
    pub stock: i32,
}

pub async fn update_product(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Json(r): Json<UpdateProductRequest>,
) -> Result<Json<Product>> {
    validate(&r)?;
    let product =
        s.store.update_product(id, &r.name, r.description.as_deref(), r.price, r.stock).await?;
    Ok(Json(product))
}
