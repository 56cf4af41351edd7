//! Flutterwave HTTP client.
//!
//! Endpoints used: `POST {base}/charges/initialize` and
//! `GET {base}/transactions/{id}/verify`, both authenticated with the
//! secret key as a bearer token. Every call carries a bounded timeout.

use serde::Deserialize;

use crate::config::GatewaySettings;
use crate::domain::PaymentMethod;
use crate::gateway::{
    ChargeOutcome, ChargeRequest, GatewayError, PaymentGateway, VerifiedStatus, VerifiedTransaction,
};

pub struct FlutterwaveGateway {
    http: reqwest::Client,
    settings: GatewaySettings,
}

impl FlutterwaveGateway {
    pub fn new(settings: GatewaySettings) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        Ok(Self { http, settings })
    }

    fn transaction_reference(&self, request: &ChargeRequest) -> String {
        format!("{}-{}", self.settings.reference_prefix, request.payment_id)
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Unavailable(err.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    status: String,
    message: Option<String>,
    data: Option<ChargeData>,
}

#[derive(Debug, Deserialize)]
struct ChargeData {
    link: Option<String>,
    tx_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    status: String,
    message: Option<String>,
    data: Option<VerifyData>,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: Option<String>,
    flw_ref: Option<String>,
    amount: Option<f64>,
    currency: Option<String>,
    payment_method: Option<String>,
}

#[async_trait::async_trait]
impl PaymentGateway for FlutterwaveGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, GatewayError> {
        let tx_ref = self.transaction_reference(request);
        let body = serde_json::json!({
            "tx_ref": tx_ref.clone(),
            "amount": request.amount,
            "currency": request.currency,
            "payment_method": request.method,
            "customer": {
                "email": request.customer_email,
                "phone_number": request.customer_phone.as_deref().unwrap_or(""),
                "name": request.customer_name.as_deref().unwrap_or(""),
            },
            "redirect_url": format!("{}/payment/success?paymentId={}", self.settings.callback_base_url, request.payment_id),
            "customizations": {
                "title": "Campus Market Payment",
                "description": format!("Order payment - {}", request.order_id),
            },
        });

        let response = self
            .http
            .post(format!("{}/charges/initialize", self.settings.base_url))
            .bearer_auth(&self.settings.secret_key)
            .json(&body)
            .send()
            .await?;
        let parsed: ChargeResponse =
            response.json().await.map_err(|e| GatewayError::Protocol(e.to_string()))?;

        if parsed.status == "success" {
            let data = parsed.data.unwrap_or(ChargeData { link: None, tx_ref: None });
            Ok(ChargeOutcome::Accepted {
                reference: data.tx_ref.unwrap_or(tx_ref),
                redirect_url: data.link,
            })
        } else {
            Ok(ChargeOutcome::Rejected {
                reason: parsed.message.unwrap_or_else(|| "charge rejected by provider".to_string()),
            })
        }
    }

    async fn verify(&self, transaction_id: &str) -> Result<VerifiedTransaction, GatewayError> {
        let response = self
            .http
            .get(format!("{}/transactions/{}/verify", self.settings.base_url, transaction_id))
            .bearer_auth(&self.settings.secret_key)
            .send()
            .await?;
        let parsed: VerifyResponse =
            response.json().await.map_err(|e| GatewayError::Protocol(e.to_string()))?;

        let data = match parsed.data {
            Some(data) if parsed.status == "success" => data,
            _ => {
                return Ok(VerifiedTransaction {
                    status: VerifiedStatus::Failed,
                    canonical_id: None,
                    method: None,
                    amount: None,
                    currency: None,
                    detail: parsed.message,
                })
            }
        };

        let status = match data.status.as_deref() {
            Some("successful") => VerifiedStatus::Successful,
            Some("pending") => VerifiedStatus::Pending,
            _ => VerifiedStatus::Failed,
        };
        Ok(VerifiedTransaction {
            status,
            canonical_id: data.flw_ref,
            method: data.payment_method.as_deref().and_then(PaymentMethod::parse),
            amount: data.amount.map(|a| a.round() as i64),
            currency: data.currency,
            detail: data.status,
        })
    }
}
