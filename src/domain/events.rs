//! Domain events published to interested consumers (NATS when configured).

use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    OrderCreated { order_id: Uuid, user_id: Uuid, total_amount: i64 },
    OrderCancelled { order_id: Uuid },
    OrderPaid { order_id: Uuid },
    PaymentCompleted { payment_id: Uuid, order_id: Uuid, amount: i64 },
    PaymentFailed { payment_id: Uuid, order_id: Uuid, reason: String },
}

impl DomainEvent {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::OrderCreated { .. } => "campus.orders.created",
            Self::OrderCancelled { .. } => "campus.orders.cancelled",
            Self::OrderPaid { .. } => "campus.orders.paid",
            Self::PaymentCompleted { .. } => "campus.payments.completed",
            Self::PaymentFailed { .. } => "campus.payments.failed",
        }
    }
}
