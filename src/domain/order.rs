//! Order Aggregate
//!
//! Orders are never physically deleted; cancellation is a status. Every
//! order-status change appends exactly one entry to the status history.
//! `payment_status` is owned by payment reconciliation, not by order
//! management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderPaymentStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub total_amount: i64,
    pub currency: String,
    pub shipping_address: Json<ShippingAddress>,
    pub payment_status: OrderPaymentStatus,
    pub order_status: OrderStatus,
    pub tracking_number: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: i64,
}

/// Checkout input line; unit price is read from the product at purchase
/// time, never trusted from the client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Append-only history entry, one per order-status change.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderStatusEntry {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub note: String,
    pub changed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderStateError {
    #[error("delivered orders cannot be cancelled")]
    DeliveredNotCancellable,
    #[error("order is already cancelled")]
    AlreadyCancelled,
    #[error("cancelled orders cannot change status")]
    Cancelled,
}

impl Order {
    /// Whether order management may cancel this order. Cancellation restores
    /// line-item stock, so the guard must run inside the same transaction as
    /// the stock restore.
    pub fn check_cancellable(&self) -> Result<(), OrderStateError> {
        match self.order_status {
            OrderStatus::Delivered => Err(OrderStateError::DeliveredNotCancellable),
            OrderStatus::Cancelled => Err(OrderStateError::AlreadyCancelled),
            _ => Ok(()),
        }
    }

    pub fn check_status_change(&self, next: OrderStatus) -> Result<(), OrderStateError> {
        if self.order_status == OrderStatus::Cancelled && next != OrderStatus::Cancelled {
            return Err(OrderStateError::Cancelled);
        }
        Ok(())
    }
}
