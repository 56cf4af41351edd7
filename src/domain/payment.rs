//! Payment Aggregate
//!
//! One row per payment attempt against an order. The status machine is
//! `pending -> processing -> completed | failed`, with an immediate
//! `pending -> failed` when the gateway rejects the charge outright.
//! `completed` and `failed` are terminal; a retry creates a new record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Account,
    Ussd,
    Mpesa,
}

impl PaymentMethod {
    /// Lenient parse for provider-reported method strings.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "card" => Some(Self::Card),
            "account" => Some(Self::Account),
            "ussd" => Some(Self::Ussd),
            "mpesa" | "m-pesa" | "mobilemoneyke" => Some(Self::Mpesa),
            _ => None,
        }
    }

    /// Whether the method is driven by a phone prompt and requires a payer
    /// phone number at initiation.
    pub fn requires_phone(self) -> bool {
        matches!(self, Self::Mpesa | Self::Ussd)
    }
}

/// Provider receipt metadata attached when a payment settles.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptDetails {
    pub receipt_number: Option<String>,
    pub settled_at: Option<String>,
    pub payer_phone: Option<String>,
}

/// The gateway-confirmed outcome applied on completion.
#[derive(Clone, Debug, Default)]
pub struct SettledPayment {
    pub canonical_transaction_id: Option<String>,
    pub method: Option<PaymentMethod>,
    pub receipt: ReceiptDetails,
}

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub reference: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub receipt_number: Option<String>,
    pub settled_at: Option<String>,
    pub failure_reason: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaymentStateError {
    #[error("payment already settled as {0:?}")]
    AlreadySettled(PaymentStatus),
    #[error("charge can only be accepted or rejected while pending, current status {0:?}")]
    NotPending(PaymentStatus),
}

impl Payment {
    pub fn new(
        user_id: Uuid,
        order_id: Uuid,
        amount: i64,
        currency: &str,
        customer_email: impl Into<String>,
        customer_phone: Option<String>,
        method: Option<PaymentMethod>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id,
            order_id,
            amount,
            currency: currency.to_string(),
            status: PaymentStatus::Pending,
            transaction_id: None,
            reference: None,
            payment_method: method,
            customer_email: customer_email.into(),
            customer_phone,
            receipt_number: None,
            settled_at: None,
            failure_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Gateway accepted the charge request; record its reference.
    pub fn accept(&mut self, reference: impl Into<String>) -> Result<(), PaymentStateError> {
        if self.status != PaymentStatus::Pending {
            return Err(PaymentStateError::NotPending(self.status));
        }
        self.status = PaymentStatus::Processing;
        self.reference = Some(reference.into());
        self.touch();
        Ok(())
    }

    /// Gateway rejected the charge request outright.
    pub fn reject(&mut self, reason: impl Into<String>) -> Result<(), PaymentStateError> {
        if self.status != PaymentStatus::Pending {
            return Err(PaymentStateError::NotPending(self.status));
        }
        self.status = PaymentStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.touch();
        Ok(())
    }

    /// Reconciliation confirmed the payment settled.
    pub fn complete(&mut self, settled: SettledPayment) -> Result<(), PaymentStateError> {
        if self.is_terminal() {
            return Err(PaymentStateError::AlreadySettled(self.status));
        }
        self.status = PaymentStatus::Completed;
        if let Some(id) = settled.canonical_transaction_id {
            self.transaction_id = Some(id);
        }
        if let Some(method) = settled.method {
            self.payment_method = Some(method);
        }
        if settled.receipt.receipt_number.is_some() {
            self.receipt_number = settled.receipt.receipt_number;
        }
        if settled.receipt.settled_at.is_some() {
            self.settled_at = settled.receipt.settled_at;
        }
        if settled.receipt.payer_phone.is_some() {
            self.customer_phone = settled.receipt.payer_phone;
        }
        self.failure_reason = None;
        self.touch();
        Ok(())
    }

    /// Reconciliation confirmed the payment did not settle.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), PaymentStateError> {
        if self.is_terminal() {
            return Err(PaymentStateError::AlreadySettled(self.status));
        }
        self.status = PaymentStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}
