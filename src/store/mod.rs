//! Persistence seams.
//!
//! The reconciliation flow consumes narrow repository traits so it can be
//! exercised against in-memory fakes; everything else talks to [`PgStore`]
//! directly.

pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Order, OrderPaymentStatus, Payment, SettledPayment, User};

pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A version-guarded update lost the race; the caller should re-read.
    #[error("concurrent update conflict")]
    Conflict,

    /// Another payment already completed for the same order.
    #[error("order already has a completed payment")]
    DuplicateCompletion,

    #[error("insufficient stock for product {0}")]
    InsufficientStock(Uuid),

    #[error("{0}")]
    InvalidState(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert(&self, payment: &Payment) -> Result<(), StoreError>;

    async fn find(&self, id: Uuid) -> Result<Option<Payment>, StoreError>;

    /// Lookup by gateway transaction id OR internal reference; callers hold
    /// one or the other depending on which side of the gateway they saw.
    async fn find_by_handle(&self, handle: &str) -> Result<Option<Payment>, StoreError>;

    /// `pending -> processing`, version-guarded.
    async fn mark_processing(&self, id: Uuid, version: i32, reference: &str)
        -> Result<Payment, StoreError>;

    /// `pending|processing -> completed`, version-guarded, and refused when
    /// another payment for the same order is already completed.
    async fn mark_completed(&self, id: Uuid, version: i32, settled: &SettledPayment)
        -> Result<Payment, StoreError>;

    /// `pending|processing -> failed`, version-guarded.
    async fn mark_failed(&self, id: Uuid, version: i32, reason: &str)
        -> Result<Payment, StoreError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    /// Returns `false` when no such order exists, so the caller can treat a
    /// dangling payment->order link as an integrity violation. `Paid` is
    /// sticky: a `Failed` write against a paid order is a no-op.
    async fn set_payment_status(&self, order_id: Uuid, status: OrderPaymentStatus)
        -> Result<bool, StoreError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find(&self, id: Uuid) -> Result<Option<User>, StoreError>;
}
