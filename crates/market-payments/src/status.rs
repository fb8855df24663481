//! Status Polling
//!
//! Lets a payment's owner ask the gateway for the live status. A status that
//! differs from ours is applied through the same transition as an IPN, so
//! polling and notifications converge on one state.

use std::sync::Arc;

use crate::error::{PaymentError, Result};
use crate::gateway::{GatewayPayment, PaymentGateway};
use crate::model::Identity;
use crate::store::PaymentStore;
use crate::transition::TransitionOutcome;

pub struct StatusPoller {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn PaymentStore>,
}

impl StatusPoller {
    pub fn new(gateway: Arc<dyn PaymentGateway>, store: Arc<dyn PaymentStore>) -> Self {
        Self { gateway, store }
    }

    /// Fetch the gateway's view of `payment_id` for `identity`.
    ///
    /// Unknown ids are `NotFound`; payments funding nothing the caller owns
    /// are `Unauthorized`. Both are decided before the gateway is called.
    pub async fn poll(&self, identity: &Identity, payment_id: &str) -> Result<GatewayPayment> {
        let payment_id = payment_id.trim();
        if payment_id.is_empty() {
            return Err(PaymentError::InvalidRequest("paymentId is required".into()));
        }

        let record = self
            .store
            .find_payment_by_external_id(payment_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("payment {payment_id}")))?;

        if !record.is_owned_by(&identity.user_id) {
            tracing::warn!(
                payment_id = %payment_id,
                user_id = %identity.user_id,
                "Status poll for a payment owned by someone else"
            );
            return Err(PaymentError::Unauthorized);
        }

        let live = self.gateway.get_payment_status(payment_id).await.inspect_err(|e| {
            tracing::error!(payment_id = %payment_id, error = %e, "Gateway status lookup failed");
        })?;

        if live.payment_status != record.payment.payment_status {
            let outcome = self
                .store
                .apply_status_transition(&record.payment, &live.payment_status)
                .await?;
            if let TransitionOutcome::Applied { from, to } = outcome {
                tracing::info!(
                    payment_id = %payment_id,
                    from = %from,
                    to = %to,
                    source = "poll",
                    "Payment status changed"
                );
            }
        }

        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::{CheckoutRequest, PaymentIntentService};
    use crate::gateway::MockGateway;
    use crate::model::{PaymentStatus, Prompt, PurchaseStatus};
    use crate::store::MemoryPaymentStore;
    use rust_decimal_macros::dec;

    async fn setup() -> (Arc<MockGateway>, Arc<MemoryPaymentStore>, StatusPoller) {
        let gateway = Arc::new(MockGateway::default());
        let store = Arc::new(MemoryPaymentStore::new());
        store
            .insert_prompt(Prompt {
                id: "prompt-1".into(),
                title: "Haiku bot".into(),
                price: dec!(1.00),
            })
            .await;

        let intents = PaymentIntentService::new(gateway.clone(), store.clone(), "http://localhost");
        gateway.queue_payment_id("P2").await;
        intents
            .create_intent(
                &Identity::new("owner"),
                &CheckoutRequest {
                    prompt_id: Some("prompt-1".into()),
                    plan: None,
                    pay_currency: "ltc".into(),
                },
            )
            .await
            .unwrap();

        let poller = StatusPoller::new(gateway.clone(), store.clone());
        (gateway, store, poller)
    }

    #[tokio::test]
    async fn test_poll_applies_newer_status() {
        let (gateway, store, poller) = setup().await;
        gateway.set_status("P2", PaymentStatus::Finished).await.unwrap();

        let live = poller.poll(&Identity::new("owner"), "P2").await.unwrap();
        assert_eq!(live.payment_status, PaymentStatus::Finished);

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.payments[0].payment_status, PaymentStatus::Finished);
        assert_eq!(snapshot.purchases[0].status, PurchaseStatus::Completed);
    }

    #[tokio::test]
    async fn test_poll_same_status_writes_nothing() {
        let (_gateway, store, poller) = setup().await;
        let before = store.snapshot().await;

        let live = poller.poll(&Identity::new("owner"), "P2").await.unwrap();
        assert_eq!(live.payment_status, PaymentStatus::Waiting);
        assert_eq!(store.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_poll_by_non_owner() {
        let (gateway, store, poller) = setup().await;
        gateway.set_status("P2", PaymentStatus::Finished).await.unwrap();
        let before = store.snapshot().await;

        let err = poller.poll(&Identity::new("intruder"), "P2").await.unwrap_err();
        assert!(matches!(err, PaymentError::Unauthorized));
        assert_eq!(store.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_poll_unknown_payment() {
        let (_gateway, _store, poller) = setup().await;
        let err = poller.poll(&Identity::new("owner"), "P404").await.unwrap_err();
        assert!(matches!(err, PaymentError::NotFound(_)));

        let err = poller.poll(&Identity::new("owner"), " ").await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidRequest(_)));
    }
}
