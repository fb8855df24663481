//! Mock Gateway
//!
//! For development mode and tests. Payments live in memory, start out
//! `waiting`, and IPNs are signed with the mock's own secret.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::{signature, CreatePaymentRequest, GatewayPayment, PaymentGateway};
use crate::error::{PaymentError, Result};
use crate::model::PaymentStatus;

const MOCK_CURRENCIES: &[&str] = &["btc", "eth", "ltc", "sol", "usdttrc20", "usdc", "xmr", "doge"];

/// In-memory stand-in for the payment processor
pub struct MockGateway {
    ipn_secret: String,
    payments: RwLock<HashMap<String, GatewayPayment>>,
    queued_ids: Mutex<VecDeque<String>>,
    failure: Mutex<Option<String>>,
    requests: Mutex<Vec<CreatePaymentRequest>>,
    next_id: AtomicU64,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new("mock-ipn-secret")
    }
}

impl MockGateway {
    pub fn new(ipn_secret: impl Into<String>) -> Self {
        Self {
            ipn_secret: ipn_secret.into(),
            payments: RwLock::new(HashMap::new()),
            queued_ids: Mutex::new(VecDeque::new()),
            failure: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(4_000_000_001),
        }
    }

    /// Use `payment_id` for the next created payment
    pub async fn queue_payment_id(&self, payment_id: impl Into<String>) {
        self.queued_ids.lock().await.push_back(payment_id.into());
    }

    /// Make `create_payment` fail with `detail` until cleared with `None`
    pub async fn set_failure(&self, detail: Option<String>) {
        *self.failure.lock().await = detail;
    }

    /// Move an existing payment to `status`, as the processor would
    pub async fn set_status(&self, payment_id: &str, status: PaymentStatus) -> Result<()> {
        let mut payments = self.payments.write().await;
        let payment = payments
            .get_mut(payment_id)
            .ok_or_else(|| PaymentError::PaymentNotFound(payment_id.to_string()))?;
        payment.payment_status = status;
        Ok(())
    }

    /// Create-payment calls received so far
    pub async fn requests(&self) -> Vec<CreatePaymentRequest> {
        self.requests.lock().await.clone()
    }

    /// Sign an IPN body the way the processor does
    pub fn sign(&self, payload: &[u8]) -> Option<String> {
        signature::sign(&self.ipn_secret, payload)
    }

    async fn allocate_id(&self) -> String {
        match self.queued_ids.lock().await.pop_front() {
            Some(id) => id,
            None => self.next_id.fetch_add(1, Ordering::Relaxed).to_string(),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn list_currencies(&self) -> Result<Vec<String>> {
        Ok(MOCK_CURRENCIES.iter().map(|c| (*c).to_string()).collect())
    }

    async fn create_payment(&self, request: &CreatePaymentRequest) -> Result<GatewayPayment> {
        self.requests.lock().await.push(request.clone());

        if let Some(detail) = self.failure.lock().await.clone() {
            return Err(PaymentError::GatewayRequest { status: 400, detail });
        }

        let payment_id = self.allocate_id().await;
        let now = chrono::Utc::now().to_rfc3339();
        let payment = GatewayPayment {
            payment_id: payment_id.clone(),
            payment_status: PaymentStatus::Waiting,
            pay_address: Some(format!("mock-address-{payment_id}")),
            price_amount: Some(request.price_amount),
            price_currency: Some(request.price_currency.clone()),
            pay_amount: None,
            actually_paid: None,
            pay_currency: Some(request.pay_currency.clone()),
            order_id: Some(request.order_id.clone()),
            order_description: Some(request.order_description.clone()),
            created_at: Some(now.clone()),
            updated_at: Some(now),
        };

        self.payments
            .write()
            .await
            .insert(payment_id, payment.clone());
        Ok(payment)
    }

    async fn get_payment_status(&self, payment_id: &str) -> Result<GatewayPayment> {
        self.payments
            .read()
            .await
            .get(payment_id)
            .cloned()
            .ok_or_else(|| PaymentError::PaymentNotFound(payment_id.to_string()))
    }

    fn verify_ipn_signature(&self, payload: &[u8], signature: &str) -> bool {
        signature::verify(&self.ipn_secret, payload, signature)
    }

    fn name(&self) -> &str {
        "MockGateway"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> CreatePaymentRequest {
        CreatePaymentRequest {
            price_amount: dec!(9.99),
            price_currency: "usd".into(),
            pay_currency: "btc".into(),
            order_id: "order-1".into(),
            order_description: "test".into(),
            ipn_callback_url: "http://localhost/payments/ipn".into(),
        }
    }

    #[tokio::test]
    async fn test_mock_payment_lifecycle() {
        let gateway = MockGateway::default();
        gateway.queue_payment_id("P1").await;

        let created = gateway.create_payment(&request()).await.unwrap();
        assert_eq!(created.payment_id, "P1");
        assert_eq!(created.payment_status, PaymentStatus::Waiting);

        gateway.set_status("P1", PaymentStatus::Finished).await.unwrap();
        let fetched = gateway.get_payment_status("P1").await.unwrap();
        assert_eq!(fetched.payment_status, PaymentStatus::Finished);
    }

    #[tokio::test]
    async fn test_mock_failure_and_unknown_id() {
        let gateway = MockGateway::default();
        gateway.set_failure(Some("pay_currency is invalid".into())).await;

        let err = gateway.create_payment(&request()).await.unwrap_err();
        assert!(matches!(err, PaymentError::GatewayRequest { .. }));

        let err = gateway.get_payment_status("nope").await.unwrap_err();
        assert!(matches!(err, PaymentError::PaymentNotFound(_)));
    }

    #[tokio::test]
    async fn test_mock_signatures() {
        let gateway = MockGateway::new("s3cret");
        let body = br#"{"payment_id":"P1","payment_status":"finished"}"#;
        let sig = gateway.sign(body).unwrap();

        assert!(gateway.verify_ipn_signature(body, &sig));
        assert!(!gateway.verify_ipn_signature(body, "deadbeef"));
        assert!(!gateway.list_currencies().await.unwrap().is_empty());
    }
}
