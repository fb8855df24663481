//! NOWPayments Client
//!
//! REST client for `api.nowpayments.io/v1`, authenticated with the
//! `x-api-key` header.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{signature, CreatePaymentRequest, GatewayPayment, PaymentGateway};
use crate::error::{PaymentError, Result};

/// NOWPayments configuration
#[derive(Clone, Debug)]
pub struct NowPaymentsConfig {
    /// API base URL, without trailing slash
    pub base_url: String,

    pub api_key: String,

    /// Secret used to sign IPN callbacks
    pub ipn_secret: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for NowPaymentsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.nowpayments.io/v1".into(),
            api_key: String::new(),
            ipn_secret: String::new(),
            timeout_secs: 30,
        }
    }
}

impl NowPaymentsConfig {
    /// Build from a variable lookup (usually `std::env::var`)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("NOWPAYMENTS_API_KEY")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| PaymentError::Config("NOWPAYMENTS_API_KEY not set".into()))?;
        let ipn_secret = lookup("NOWPAYMENTS_IPN_SECRET")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| PaymentError::Config("NOWPAYMENTS_IPN_SECRET not set".into()))?;
        let defaults = Self::default();
        let base_url = lookup("NOWPAYMENTS_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.base_url);
        let timeout_secs = lookup("NOWPAYMENTS_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.timeout_secs);

        Ok(Self {
            base_url,
            api_key,
            ipn_secret,
            timeout_secs,
        })
    }
}

/// Error body the API returns on non-2xx
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CurrenciesResponse {
    currencies: Vec<String>,
}

/// NOWPayments REST client
pub struct NowPaymentsClient {
    http: reqwest::Client,
    config: NowPaymentsConfig,
}

impl NowPaymentsClient {
    pub fn new(config: NowPaymentsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PaymentError::Config(format!("http client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(NowPaymentsConfig::from_lookup(|key| std::env::var(key).ok())?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path.trim_start_matches('/'))
    }

    /// Upstream detail for an error response, without echoing our key
    fn error_detail(body: &str) -> String {
        match serde_json::from_str::<ApiErrorBody>(body) {
            Ok(ApiErrorBody { code, message }) => match (code, message) {
                (Some(code), Some(message)) => format!("{code}: {message}"),
                (None, Some(message)) => message,
                (Some(code), None) => code,
                (None, None) => body.to_string(),
            },
            Err(_) => body.to_string(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(reqwest::StatusCode, String)> {
        let response = request
            .header("x-api-key", &self.config.api_key)
            .send()
            .await
            .map_err(|e| PaymentError::GatewayUnavailable(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::GatewayUnavailable(e.without_url().to_string()))?;
        Ok((status, body))
    }

    fn parse_payment(body: &str) -> Result<GatewayPayment> {
        serde_json::from_str(body)
            .map_err(|e| PaymentError::GatewayUnavailable(format!("unexpected payment body: {e}")))
    }
}

#[async_trait]
impl PaymentGateway for NowPaymentsClient {
    async fn list_currencies(&self) -> Result<Vec<String>> {
        let (status, body) = self.send(self.http.get(self.url("currencies"))).await?;

        if !status.is_success() {
            return Err(PaymentError::GatewayUnavailable(format!(
                "currencies returned {}: {}",
                status.as_u16(),
                Self::error_detail(&body)
            )));
        }

        let parsed: CurrenciesResponse = serde_json::from_str(&body)
            .map_err(|e| PaymentError::GatewayUnavailable(format!("unexpected currencies body: {e}")))?;
        Ok(parsed.currencies)
    }

    async fn create_payment(&self, request: &CreatePaymentRequest) -> Result<GatewayPayment> {
        tracing::debug!(
            order_id = %request.order_id,
            pay_currency = %request.pay_currency,
            "Creating NOWPayments payment"
        );

        let (status, body) = self
            .send(self.http.post(self.url("payment")).json(request))
            .await?;

        if !status.is_success() {
            return Err(PaymentError::GatewayRequest {
                status: status.as_u16(),
                detail: Self::error_detail(&body),
            });
        }

        Self::parse_payment(&body)
    }

    async fn get_payment_status(&self, payment_id: &str) -> Result<GatewayPayment> {
        let (status, body) = self
            .send(self.http.get(self.url(&format!("payment/{payment_id}"))))
            .await?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PaymentError::PaymentNotFound(payment_id.to_string()));
        }
        if !status.is_success() {
            let detail = Self::error_detail(&body);
            if detail.to_lowercase().contains("not found") {
                return Err(PaymentError::PaymentNotFound(payment_id.to_string()));
            }
            return Err(PaymentError::GatewayRequest {
                status: status.as_u16(),
                detail,
            });
        }

        Self::parse_payment(&body)
    }

    fn verify_ipn_signature(&self, payload: &[u8], signature: &str) -> bool {
        signature::verify(&self.config.ipn_secret, payload, signature)
    }

    fn name(&self) -> &str {
        "NOWPayments"
    }
}
