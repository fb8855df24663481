//! Payment Intents
//!
//! Turns a user's checkout request into a gateway payment plus local
//! pending records. The gateway is called first and the records are written
//! only once it succeeds, so a failed gateway call leaves nothing behind.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PaymentError, Result};
use crate::gateway::{CreatePaymentRequest, PaymentGateway};
use crate::model::{Identity, IntentTarget, Payment, Plan};
use crate::store::PaymentStore;

/// Fiat currency prices are quoted in
pub const PRICE_CURRENCY: &str = "usd";

/// Path the gateway posts IPNs to
pub const IPN_PATH: &str = "/payments/ipn";

/// Checkout request as clients send it: `promptId` xor `plan`
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub prompt_id: Option<String>,

    #[serde(default)]
    pub plan: Option<String>,

    pub pay_currency: String,
}

impl CheckoutRequest {
    pub fn target(&self) -> Result<IntentTarget> {
        let prompt_id = self.prompt_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let plan = self.plan.as_deref().map(str::trim).filter(|s| !s.is_empty());

        match (prompt_id, plan) {
            (Some(prompt_id), None) => Ok(IntentTarget::Prompt(prompt_id.to_string())),
            (None, Some(plan)) => Ok(IntentTarget::Plan(Plan::parse(plan)?)),
            (Some(_), Some(_)) => Err(PaymentError::InvalidRequest(
                "send either promptId or plan, not both".into(),
            )),
            (None, None) => Err(PaymentError::InvalidRequest(
                "promptId or plan is required".into(),
            )),
        }
    }

    /// Pay currency as the gateway expects it
    pub fn pay_currency(&self) -> Result<String> {
        let currency = self.pay_currency.trim().to_lowercase();
        if currency.is_empty() || !currency.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PaymentError::InvalidRequest(format!(
                "invalid payCurrency '{}'",
                self.pay_currency
            )));
        }
        Ok(currency)
    }
}

/// A created payment and where to send the user next
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub payment: Payment,
    pub redirect_url: String,
}

/// Creates payment intents
pub struct PaymentIntentService {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn PaymentStore>,
    callback_base_url: String,
}

impl PaymentIntentService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn PaymentStore>,
        callback_base_url: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            store,
            callback_base_url: callback_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Where the gateway should deliver IPNs
    pub fn ipn_callback_url(&self) -> String {
        format!("{}{}", self.callback_base_url, IPN_PATH)
    }

    /// Status view for an external payment id
    pub fn redirect_url(payment_id: &str) -> String {
        format!("/payments/status?paymentId={payment_id}")
    }

    /// Create a gateway payment and its local pending records
    pub async fn create_intent(
        &self,
        identity: &Identity,
        request: &CheckoutRequest,
    ) -> Result<PaymentIntent> {
        let target = request.target()?;
        let pay_currency = request.pay_currency()?;

        let payment = match target {
            IntentTarget::Prompt(prompt_id) => {
                self.purchase_prompt(identity, &prompt_id, pay_currency).await?
            }
            IntentTarget::Plan(plan) => self.subscribe(identity, plan, pay_currency).await?,
        };

        Ok(PaymentIntent {
            redirect_url: Self::redirect_url(&payment.payment_id),
            payment,
        })
    }

    async fn purchase_prompt(
        &self,
        identity: &Identity,
        prompt_id: &str,
        pay_currency: String,
    ) -> Result<Payment> {
        let prompt = self
            .store
            .find_prompt(prompt_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("prompt {prompt_id}")))?;

        if self
            .store
            .has_completed_purchase(&identity.user_id, &prompt.id)
            .await?
        {
            return Err(PaymentError::AlreadyPurchased {
                user_id: identity.user_id.clone(),
                prompt_id: prompt.id,
            });
        }

        let request = CreatePaymentRequest {
            price_amount: prompt.price,
            price_currency: PRICE_CURRENCY.into(),
            pay_currency,
            order_id: format!("prompt:{}:{}", prompt.id, Uuid::new_v4().simple()),
            order_description: format!("Prompt: {}", prompt.title),
            ipn_callback_url: self.ipn_callback_url(),
        };

        let external = self.call_gateway(&request).await?;
        let payment = self
            .store
            .create_purchase_payment(&external, &request, &identity.user_id, &prompt)
            .await
            .inspect_err(|e| Self::log_orphan(&external.payment_id, e))?;

        tracing::info!(
            payment_id = %payment.payment_id,
            user_id = %identity.user_id,
            prompt_id = %prompt.id,
            amount = %payment.price_amount,
            "Created prompt purchase intent"
        );
        Ok(payment)
    }

    async fn subscribe(&self, identity: &Identity, plan: Plan, pay_currency: String) -> Result<Payment> {
        let request = CreatePaymentRequest {
            price_amount: plan.price(),
            price_currency: PRICE_CURRENCY.into(),
            pay_currency,
            order_id: format!("subscription:{}:{}", plan.as_str(), Uuid::new_v4().simple()),
            order_description: plan.description().into(),
            ipn_callback_url: self.ipn_callback_url(),
        };

        let external = self.call_gateway(&request).await?;
        let payment = self
            .store
            .create_subscription_payment(&external, &request, &identity.user_id, plan)
            .await
            .inspect_err(|e| Self::log_orphan(&external.payment_id, e))?;

        tracing::info!(
            payment_id = %payment.payment_id,
            user_id = %identity.user_id,
            plan = plan.as_str(),
            "Created subscription intent"
        );
        Ok(payment)
    }

    async fn call_gateway(&self, request: &CreatePaymentRequest) -> Result<crate::gateway::GatewayPayment> {
        self.gateway.create_payment(request).await.inspect_err(|e| {
            tracing::error!(
                gateway = self.gateway.name(),
                order_id = %request.order_id,
                error = %e,
                "Gateway payment creation failed"
            );
        })
    }

    // The gateway now holds a payment we have no row for. Its IPNs will 404
    // until someone reconciles by hand.
    fn log_orphan(payment_id: &str, error: &PaymentError) {
        tracing::error!(
            payment_id = %payment_id,
            error = %error,
            "Gateway payment created but local record failed; payment is orphaned"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use crate::model::{PaymentStatus, PurchaseStatus, SubscriptionStatus};
    use crate::store::MemoryPaymentStore;
    use crate::transition::TransitionOutcome;
    use rust_decimal_macros::dec;

    struct Fixture {
        gateway: Arc<MockGateway>,
        store: Arc<MemoryPaymentStore>,
        service: PaymentIntentService,
    }

    async fn fixture() -> Fixture {
        let gateway = Arc::new(MockGateway::default());
        let store = Arc::new(MemoryPaymentStore::new());
        store
            .insert_prompt(crate::model::Prompt {
                id: "prompt-1".into(),
                title: "SQL tutor".into(),
                price: dec!(4.99),
            })
            .await;
        let service = PaymentIntentService::new(
            gateway.clone(),
            store.clone(),
            "https://market.example.com/",
        );
        Fixture {
            gateway,
            store,
            service,
        }
    }

    fn prompt_request() -> CheckoutRequest {
        CheckoutRequest {
            prompt_id: Some("prompt-1".into()),
            plan: None,
            pay_currency: "BTC".into(),
        }
    }

    fn plan_request(plan: &str) -> CheckoutRequest {
        CheckoutRequest {
            prompt_id: None,
            plan: Some(plan.into()),
            pay_currency: "btc".into(),
        }
    }

    #[test]
    fn test_target_requires_exactly_one() {
        let both = CheckoutRequest {
            prompt_id: Some("p".into()),
            plan: Some("monthly".into()),
            pay_currency: "btc".into(),
        };
        assert!(matches!(both.target(), Err(PaymentError::InvalidRequest(_))));

        let neither = CheckoutRequest {
            prompt_id: None,
            plan: Some("  ".into()),
            pay_currency: "btc".into(),
        };
        assert!(matches!(neither.target(), Err(PaymentError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_subscription_intent_scenario() {
        let f = fixture().await;
        f.gateway.queue_payment_id("P1").await;

        let intent = f
            .service
            .create_intent(&Identity::new("u1"), &plan_request("monthly"))
            .await
            .unwrap();

        assert_eq!(intent.payment.payment_id, "P1");
        assert_eq!(intent.payment.payment_status, PaymentStatus::Waiting);
        assert_eq!(intent.payment.price_amount, dec!(9.99));
        assert_eq!(intent.redirect_url, "/payments/status?paymentId=P1");

        let sent = f.gateway.requests().await;
        assert_eq!(sent[0].ipn_callback_url, "https://market.example.com/payments/ipn");
        assert_eq!(sent[0].pay_currency, "btc");

        let snapshot = f.store.snapshot().await;
        assert_eq!(snapshot.subscriptions.len(), 1);
        assert_eq!(snapshot.subscriptions[0].status, SubscriptionStatus::Pending);
    }

    #[tokio::test]
    async fn test_invalid_plan() {
        let f = fixture().await;
        let err = f
            .service
            .create_intent(&Identity::new("u1"), &plan_request("lifetime"))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidPlan(_)));
        assert!(f.gateway.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_prompt() {
        let f = fixture().await;
        let mut request = prompt_request();
        request.prompt_id = Some("missing".into());

        let err = f
            .service
            .create_intent(&Identity::new("u1"), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_no_rows() {
        let f = fixture().await;
        f.gateway.set_failure(Some("currency not supported".into())).await;

        let err = f
            .service
            .create_intent(&Identity::new("u1"), &prompt_request())
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::GatewayRequest { .. }));
        let snapshot = f.store.snapshot().await;
        assert!(snapshot.payments.is_empty());
        assert!(snapshot.purchases.is_empty());
    }

    #[tokio::test]
    async fn test_pending_attempts_allowed_but_completed_blocks() {
        let f = fixture().await;
        let user = Identity::new("u1");

        let first = f.service.create_intent(&user, &prompt_request()).await.unwrap();
        let second = f.service.create_intent(&user, &prompt_request()).await.unwrap();
        assert_ne!(first.payment.payment_id, second.payment.payment_id);

        let outcome = f
            .store
            .apply_status_transition(&first.payment, &PaymentStatus::Finished)
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Applied { .. }));

        let err = f.service.create_intent(&user, &prompt_request()).await.unwrap_err();
        assert!(matches!(err, PaymentError::AlreadyPurchased { .. }));

        // another user is unaffected
        f.service
            .create_intent(&Identity::new("u2"), &prompt_request())
            .await
            .unwrap();

        let completed = f
            .store
            .snapshot()
            .await
            .purchases
            .into_iter()
            .filter(|p| p.user_id == "u1" && p.status == PurchaseStatus::Completed)
            .count();
        assert_eq!(completed, 1);
    }
}
