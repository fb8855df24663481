//! Payment Gateway Integration
//!
//! Abstractions over the crypto payment processor plus the NOWPayments
//! client and an in-process mock.

mod mock;
mod nowpayments;
pub mod signature;

pub use mock::MockGateway;
pub use nowpayments::{NowPaymentsClient, NowPaymentsConfig};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;
use crate::model::PaymentStatus;

/// Gateway client trait (Strategy pattern)
///
/// Every HTTP interaction with the processor goes through here.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Currency codes the processor accepts as pay currency
    async fn list_currencies(&self) -> Result<Vec<String>>;

    /// Create an external payment
    async fn create_payment(&self, request: &CreatePaymentRequest) -> Result<GatewayPayment>;

    /// Current state of an external payment
    async fn get_payment_status(&self, payment_id: &str) -> Result<GatewayPayment>;

    /// Check an IPN body against its signature header.
    ///
    /// Never errors: anything unverifiable is `false`.
    fn verify_ipn_signature(&self, payload: &[u8], signature: &str) -> bool;

    /// Gateway name
    fn name(&self) -> &str;
}

/// Body of a create-payment call
#[derive(Clone, Debug, Serialize)]
pub struct CreatePaymentRequest {
    #[serde(with = "rust_decimal::serde::float")]
    pub price_amount: Decimal,
    pub price_currency: String,
    pub pay_currency: String,
    /// Our reference; carries the prompt or plan the payment funds
    pub order_id: String,
    pub order_description: String,
    pub ipn_callback_url: String,
}

/// Payment descriptor as the processor reports it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayment {
    #[serde(deserialize_with = "string_or_number")]
    pub payment_id: String,
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub pay_address: Option<String>,
    #[serde(default)]
    pub price_amount: Option<Decimal>,
    #[serde(default)]
    pub price_currency: Option<String>,
    #[serde(default)]
    pub pay_amount: Option<Decimal>,
    #[serde(default)]
    pub actually_paid: Option<Decimal>,
    #[serde(default)]
    pub pay_currency: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub order_description: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// The processor sends ids as numbers in some responses and strings in others
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}
