use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::{
    DomainEvent, NewOrderItem, Order, OrderItem, OrderStatus, OrderStatusEntry, ShippingAddress,
};
use crate::error::{AppError, Result};
use crate::http::products::PaginatedResponse;
use crate::http::{validate, AppState};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub user_id: Uuid,
    #[validate(length(min = 1, message = "order must contain items"))]
    pub items: Vec<NewOrderItem>,
    pub shipping_address: ShippingAddress,
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub status_history: Vec<OrderStatusEntry>,
}

pub async fn create_order(
    State(s): State<AppState>,
    Json(r): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderDetail>)> {
    validate(&r)?;
    if r.items.iter().any(|i| i.quantity < 1) {
        return Err(AppError::InvalidInput("item quantity must be at least 1".into()));
    }
    let order =
        s.store.create_order(r.user_id, &r.items, &r.shipping_address, r.note.as_deref()).await?;
    s.events
        .publish(&DomainEvent::OrderCreated {
            order_id: order.id,
            user_id: order.user_id,
            total_amount: order.total_amount,
        })
        .await;
    let items = s.store.order_items(order.id).await?;
    let status_history = s.store.order_history(order.id).await?;
    Ok((StatusCode::CREATED, Json(OrderDetail { order, items, status_history })))
}

#[derive(Debug, Deserialize)]
pub struct OrderListParams {
    pub user_id: Option<Uuid>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub async fn list_orders(
    State(s): State<AppState>,
    Query(p): Query<OrderListParams>,
) -> Result<Json<PaginatedResponse<Order>>> {
    if let Some(user_id) = p.user_id {
        let orders = s.store.orders_for_user(user_id).await?;
        let total = orders.len() as i64;
        return Ok(Json(PaginatedResponse { data: orders, total, page: 1 }));
    }
    let page = p.page.unwrap_or(1).max(1);
    let per_page = p.per_page.unwrap_or(20).min(100);
    let (orders, total) = s.store.all_orders(page, per_page).await?;
    Ok(Json(PaginatedResponse { data: orders, total, page }))
}

pub async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<OrderDetail>> {
    let order = s.store.order(id).await?.ok_or(AppError::NotFound("order"))?;
    let items = s.store.order_items(id).await?;
    let status_history = s.store.order_history(id).await?;
    Ok(Json(OrderDetail { order, items, status_history }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub order_status: OrderStatus,
    pub tracking_number: Option<String>,
    pub note: Option<String>,
    pub changed_by: Option<Uuid>,
}

pub async fn update_status(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Json(r): Json<UpdateStatusRequest>,
) -> Result<Json<Order>> {
    let order = s
        .store
        .update_order_status(
            id,
            r.order_status,
            r.tracking_number.as_deref(),
            r.note.as_deref().unwrap_or(""),
            r.changed_by,
        )
        .await?;
    Ok(Json(order))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub changed_by: Option<Uuid>,
}

pub async fn cancel_order(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<Order>> {
    let changed_by = body.and_then(|Json(r)| r.changed_by);
    let order = s.store.cancel_order(id, changed_by).await?;
    s.events.publish(&DomainEvent::OrderCancelled { order_id: order.id }).await;
    Ok(Json(order))
}
