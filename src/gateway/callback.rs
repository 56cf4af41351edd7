//! Provider callback normalization.
//!
//! Each provider pushes a differently-shaped notification; a parser per
//! provider turns the raw payload into one [`Notification`] the
//! reconciliation flow understands. The provider is chosen by an explicit
//! discriminator (the callback route segment), never by sniffing the shape.

use serde_json::Value;
use thiserror::Error;

use crate::domain::ReceiptDetails;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackProvider {
    Flutterwave,
    Mpesa,
}

impl CallbackProvider {
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "flutterwave" => Some(Self::Flutterwave),
            "mpesa" => Some(Self::Mpesa),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flutterwave => "flutterwave",
            Self::Mpesa => "mpesa",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReportedStatus {
    Successful,
    Failed { description: String },
}

/// Canonical form of a provider notification.
#[derive(Clone, Debug)]
pub struct Notification {
    pub transaction_id: Option<String>,
    pub reference: Option<String>,
    pub status: ReportedStatus,
    pub receipt: ReceiptDetails,
}

impl Notification {
    /// The lookup handle: the provider transaction id when present, else the
    /// reference.
    pub fn handle(&self) -> Option<&str> {
        self.transaction_id.as_deref().or(self.reference.as_deref())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid callback payload: {0}")]
pub struct InvalidCallback(pub String);

pub fn parse_callback(provider: CallbackProvider, payload: &Value) -> Result<Notification, InvalidCallback> {
    match provider {
        CallbackProvider::Flutterwave => parse_flutterwave(payload),
        CallbackProvider::Mpesa => parse_mpesa(payload),
    }
}

/// Accepts strings and numbers; providers are not consistent about id types.
fn loose_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn field(payload: &Value, name: &str) -> Option<String> {
    payload.get(name).and_then(loose_string)
}

/// Flat shape: `{ transaction_id, status, transaction_reference? }`.
fn parse_flutterwave(payload: &Value) -> Result<Notification, InvalidCallback> {
    let transaction_id =
        field(payload, "transaction_id").ok_or_else(|| InvalidCallback("missing transaction_id".into()))?;
    let status = field(payload, "status").ok_or_else(|| InvalidCallback("missing status".into()))?;

    let status = if status == "successful" {
        ReportedStatus::Successful
    } else {
        ReportedStatus::Failed { description: format!("provider reported status '{status}'") }
    };
    Ok(Notification {
        transaction_id: Some(transaction_id),
        reference: field(payload, "transaction_reference"),
        status,
        receipt: ReceiptDetails::default(),
    })
}

/// STK push shape: identifiers and result code nested under
/// `Body.stkCallback`, receipt fields as `CallbackMetadata.Item` name/value
/// pairs.
fn parse_mpesa(payload: &Value) -> Result<Notification, InvalidCallback> {
    let callback = payload
        .get("Body")
        .and_then(|b| b.get("stkCallback"))
        .ok_or_else(|| InvalidCallback("missing Body.stkCallback".into()))?;

    let checkout_id = field(callback, "CheckoutRequestID")
        .ok_or_else(|| InvalidCallback("missing CheckoutRequestID".into()))?;
    let result_code = callback
        .get("ResultCode")
        .and_then(Value::as_i64)
        .ok_or_else(|| InvalidCallback("missing ResultCode".into()))?;
    let description = field(callback, "ResultDesc").unwrap_or_default();

    let mut receipt = ReceiptDetails::default();
    if let Some(items) = callback
        .get("CallbackMetadata")
        .and_then(|m| m.get("Item"))
        .and_then(Value::as_array)
    {
        for item in items {
            let Some(name) = item.get("Name").and_then(Value::as_str) else { continue };
            let value = item.get("Value").and_then(loose_string);
            match name {
                "MpesaReceiptNumber" => receipt.receipt_number = value,
                "TransactionDate" => receipt.settled_at = value,
                "PhoneNumber" => receipt.payer_phone = value,
                _ => {}
            }
        }
    }

    let status = if result_code == 0 {
        ReportedStatus::Successful
    } else {
        ReportedStatus::Failed {
            description: if description.is_empty() {
                format!("mpesa result code {result_code}")
            } else {
                description
            },
        }
    };
    Ok(Notification {
        transaction_id: Some(checkout_id),
        reference: field(callback, "MerchantRequestID"),
        status,
        receipt,
    })
}
