//! External payment gateway seam.
//!
//! The reconciliation core talks to providers through [`PaymentGateway`]
//! only; provider SDK specifics stay behind it. Asynchronous provider
//! notifications are normalized by the parsers in [`callback`].

pub mod callback;
pub mod flutterwave;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::PaymentMethod;

pub use callback::{parse_callback, CallbackProvider, InvalidCallback, Notification, ReportedStatus};
pub use flutterwave::FlutterwaveGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request timed out")]
    Timeout,
    #[error("gateway unreachable: {0}")]
    Unavailable(String),
    #[error("unexpected gateway response: {0}")]
    Protocol(String),
}

/// Outbound charge request, one per payment attempt.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub customer_name: Option<String>,
    pub method: Option<PaymentMethod>,
}

#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    /// Provider accepted the charge; `reference` is our handle for later
    /// reconciliation, `redirect_url` is handed to the client.
    Accepted { reference: String, redirect_url: Option<String> },
    Rejected { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifiedStatus {
    Successful,
    Pending,
    Failed,
}

/// The provider's authoritative view of one transaction.
#[derive(Debug, Clone)]
pub struct VerifiedTransaction {
    pub status: VerifiedStatus,
    /// Provider-canonical transaction id, recorded on completion.
    pub canonical_id: Option<String>,
    pub method: Option<PaymentMethod>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub detail: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Ask the provider to start a charge. A `Rejected` outcome is a normal
    /// return, not an error; errors mean the provider could not be reached.
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, GatewayError>;

    /// Fetch the authoritative status of a transaction.
    async fn verify(&self, transaction_id: &str) -> Result<VerifiedTransaction, GatewayError>;
}
