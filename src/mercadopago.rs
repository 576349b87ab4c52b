//! Mercado Pago client.
//!
//! The only place processor payloads exist in their wire shape: everything
//! is decoded here into typed DTOs and the rest of the codebase works on
//! those. Webhook handling never trusts webhook-embedded amounts — it
//! re-fetches the payment through [`MercadoPagoClient::get_payment`].

use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::MercadoPagoConfig;
use crate::models::PaymentMethod;

/// Payment processor error.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("mercado pago api error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl ProcessorError {
    /// Transient failures worth retrying on idempotent GETs.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status >= 500,
        }
    }
}

/// Payment status as reported by the processor.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MpPaymentStatus {
    Pending,
    Approved,
    Authorized,
    InProcess,
    InMediation,
    Rejected,
    Cancelled,
    Refunded,
    ChargedBack,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MpFeeDetail {
    #[serde(default)]
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub fee_type: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MpPayer {
    pub id: Option<String>,
    pub email: Option<String>,
}

/// Authoritative payment details fetched from the processor by id.
#[derive(Debug, Deserialize, Clone)]
pub struct MpPayment {
    pub id: i64,
    pub status: MpPaymentStatus,
    pub status_detail: Option<String>,
    pub external_reference: Option<String>,
    pub transaction_amount: Decimal,
    pub transaction_amount_refunded: Option<Decimal>,
    #[serde(default)]
    pub fee_details: Vec<MpFeeDetail>,
    pub payment_type_id: Option<String>,
    pub currency_id: Option<String>,
    pub payer: Option<MpPayer>,
}

impl MpPayment {
    /// Total processor fee across all fee detail lines.
    pub fn total_fees(&self) -> Decimal {
        self.fee_details.iter().map(|f| f.amount).sum()
    }
}

/// Map the processor's `payment_type_id` onto our payment method enum.
pub fn map_payment_method(payment_type_id: Option<&str>) -> Option<PaymentMethod> {
    match payment_type_id? {
        "credit_card" | "debit_card" => Some(PaymentMethod::Card),
        "pix" => Some(PaymentMethod::Pix),
        "ticket" | "bolbradesco" => Some(PaymentMethod::Boleto),
        "account_money" => Some(PaymentMethod::AccountMoney),
        _ => None,
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct PreferenceItem {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub currency_id: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct PreferencePayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct PreferenceBackUrls {
    pub success: String,
    pub failure: String,
    pub pending: String,
}

/// Request body for creating a hosted checkout preference.
#[derive(Debug, Serialize, Clone)]
pub struct PreferenceRequest {
    pub items: Vec<PreferenceItem>,
    pub payer: PreferencePayer,
    pub back_urls: PreferenceBackUrls,
    pub auto_return: String,
    pub external_reference: String,
    pub notification_url: String,
    pub expires: bool,
    pub expiration_date_to: String,
    pub metadata: serde_json::Value,
}

/// Hosted checkout artifact: id plus the redirect URL.
#[derive(Debug, Deserialize, Clone)]
pub struct PreferenceResponse {
    pub id: String,
    pub init_point: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefundResponse {
    pub id: i64,
    pub status: Option<String>,
}

/// Result of a PIX transfer to a guide.
#[derive(Debug, Deserialize, Clone)]
pub struct PixTransferResponse {
    pub id: String,
    pub end_to_end_id: Option<String>,
    pub receipt_url: Option<String>,
}

/// HTTP client for the Mercado Pago API.
pub struct MercadoPagoClient {
    http: Client,
    base_url: String,
    access_token: String,
}

impl MercadoPagoClient {
    /// Build the client with rustls and the configured timeout.
    ///
    /// # Errors
    /// Returns [`ProcessorError::Http`] when the underlying client cannot be
    /// constructed.
    pub fn new(cfg: &MercadoPagoConfig) -> Result<Self, ProcessorError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            access_token: cfg.access_token.clone(),
        })
    }

    async fn check<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProcessorError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProcessorError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<T>().await?)
    }

    /// Create a hosted checkout preference.
    pub async fn create_preference(
        &self,
        request: &PreferenceRequest,
    ) -> Result<PreferenceResponse, ProcessorError> {
        let response = self
            .http
            .post(format!("{}/checkout/preferences", self.base_url))
            .bearer_auth(&self.access_token)
            .json(request)
            .send()
            .await?;
        Self::check(response).await
    }

    /// Fetch authoritative payment details by id.
    pub async fn get_payment(&self, payment_id: &str) -> Result<MpPayment, ProcessorError> {
        let response = self
            .http
            .get(format!("{}/v1/payments/{payment_id}", self.base_url))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        Self::check(response).await
    }

    /// Refund a payment, partially when `amount` is given.
    pub async fn create_refund(
        &self,
        payment_id: &str,
        amount: Option<Decimal>,
    ) -> Result<RefundResponse, ProcessorError> {
        let body = match amount {
            Some(amount) => serde_json::json!({ "amount": amount }),
            None => serde_json::json!({}),
        };
        let response = self
            .http
            .post(format!("{}/v1/payments/{payment_id}/refunds", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        Self::check(response).await
    }

    /// Execute a PIX transfer to a guide's key.
    pub async fn create_pix_transfer(
        &self,
        pix_key: &str,
        pix_key_type: &str,
        amount: Decimal,
        external_reference: &str,
    ) -> Result<PixTransferResponse, ProcessorError> {
        let body = serde_json::json!({
            "pix_key": pix_key,
            "pix_key_type": pix_key_type,
            "amount": amount,
            "external_reference": external_reference,
        });
        let response = self
            .http
            .post(format!("{}/v1/payouts", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        Self::check(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decodes_payment_details() {
        let raw = serde_json::json!({
            "id": 123456789,
            "status": "approved",
            "status_detail": "accredited",
            "external_reference": "reservation_5f2e7f6a-1c9f-4a93-8f1f-1d2f3a4b5c6d_1717171717000",
            "transaction_amount": 5000.0,
            "fee_details": [
                { "amount": 49.9, "type": "mercadopago_fee" },
                { "amount": 10.1, "type": "financing_fee" }
            ],
            "payment_type_id": "pix",
            "currency_id": "BRL",
            "payer": { "id": "77", "email": "trekker@example.com" }
        });
        let payment: MpPayment = serde_json::from_value(raw).unwrap();
        assert_eq!(payment.status, MpPaymentStatus::Approved);
        assert_eq!(payment.transaction_amount, dec!(5000.0));
        assert_eq!(payment.total_fees(), dec!(60.0));
    }

    #[test]
    fn unknown_status_does_not_fail_decoding() {
        let raw = serde_json::json!({
            "id": 1,
            "status": "some_future_status",
            "transaction_amount": 10.0
        });
        let payment: MpPayment = serde_json::from_value(raw).unwrap();
        assert_eq!(payment.status, MpPaymentStatus::Unknown);
        assert!(payment.fee_details.is_empty());
    }

    #[test]
    fn maps_payment_types() {
        assert_eq!(map_payment_method(Some("credit_card")), Some(PaymentMethod::Card));
        assert_eq!(map_payment_method(Some("debit_card")), Some(PaymentMethod::Card));
        assert_eq!(map_payment_method(Some("pix")), Some(PaymentMethod::Pix));
        assert_eq!(map_payment_method(Some("ticket")), Some(PaymentMethod::Boleto));
        assert_eq!(map_payment_method(Some("account_money")), Some(PaymentMethod::AccountMoney));
        assert_eq!(map_payment_method(Some("something_else")), None);
        assert_eq!(map_payment_method(None), None);
    }
}
