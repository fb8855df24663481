//! In-memory payment store (for development, mock mode and tests)
//!
//! One lock guards the whole aggregate, so every operation is atomic.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{new_payment, PaymentStore};
use crate::error::{PaymentError, Result};
use crate::gateway::{CreatePaymentRequest, GatewayPayment};
use crate::model::{
    Payment, PaymentRecord, PaymentStatus, Plan, Prompt, Purchase, PurchaseStatus, Subscription,
    SubscriptionStatus,
};
use crate::transition::{apply_to_purchase, apply_to_subscription, TransitionOutcome};

#[derive(Default)]
struct Inner {
    prompts: HashMap<String, Prompt>,
    payments: HashMap<Uuid, Payment>,
    by_external_id: HashMap<String, Uuid>,
    purchases: HashMap<Uuid, Purchase>,
    subscriptions: HashMap<Uuid, Subscription>,
}

impl Inner {
    fn insert_payment(&mut self, payment: Payment) -> Result<()> {
        if self.by_external_id.contains_key(&payment.payment_id) {
            return Err(PaymentError::Storage(format!(
                "duplicate payment_id {}",
                payment.payment_id
            )));
        }
        self.by_external_id
            .insert(payment.payment_id.clone(), payment.id);
        self.payments.insert(payment.id, payment);
        Ok(())
    }
}

/// Every row in the store, sorted by id, for before/after comparisons
#[derive(Clone, Debug, PartialEq)]
pub struct StoreSnapshot {
    pub payments: Vec<Payment>,
    pub purchases: Vec<Purchase>,
    pub subscriptions: Vec<Subscription>,
}

/// In-memory payment store
#[derive(Default)]
pub struct MemoryPaymentStore {
    inner: RwLock<Inner>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a catalog entry
    pub async fn insert_prompt(&self, prompt: Prompt) {
        self.inner
            .write()
            .await
            .prompts
            .insert(prompt.id.clone(), prompt);
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.read().await;

        let mut payments: Vec<Payment> = inner.payments.values().cloned().collect();
        payments.sort_by_key(|p| p.id);
        let mut purchases: Vec<Purchase> = inner.purchases.values().cloned().collect();
        purchases.sort_by_key(|p| p.id);
        let mut subscriptions: Vec<Subscription> = inner.subscriptions.values().cloned().collect();
        subscriptions.sort_by_key(|s| s.id);

        StoreSnapshot {
            payments,
            purchases,
            subscriptions,
        }
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn find_prompt(&self, prompt_id: &str) -> Result<Option<Prompt>> {
        Ok(self.inner.read().await.prompts.get(prompt_id).cloned())
    }

    async fn has_completed_purchase(&self, user_id: &str, prompt_id: &str) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner.purchases.values().any(|p| {
            p.user_id == user_id && p.prompt_id == prompt_id && p.status == PurchaseStatus::Completed
        }))
    }

    async fn create_purchase_payment(
        &self,
        external: &GatewayPayment,
        request: &CreatePaymentRequest,
        user_id: &str,
        prompt: &Prompt,
    ) -> Result<Payment> {
        let now = Utc::now();
        let payment = new_payment(external, request, now);
        let purchase = Purchase {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            prompt_id: prompt.id.clone(),
            price: prompt.price,
            status: PurchaseStatus::Pending,
            payment_id: payment.id,
            purchased_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.write().await;
        inner.insert_payment(payment.clone())?;
        inner.purchases.insert(purchase.id, purchase);
        Ok(payment)
    }

    async fn create_subscription_payment(
        &self,
        external: &GatewayPayment,
        request: &CreatePaymentRequest,
        user_id: &str,
        plan: Plan,
    ) -> Result<Payment> {
        let now = Utc::now();
        let payment = new_payment(external, request, now);
        let subscription = Subscription {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            plan,
            status: SubscriptionStatus::Pending,
            payment_id: payment.id,
            current_period_end: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.write().await;
        inner.insert_payment(payment.clone())?;
        inner.subscriptions.insert(subscription.id, subscription);
        Ok(payment)
    }

    async fn find_payment_by_external_id(&self, payment_id: &str) -> Result<Option<PaymentRecord>> {
        let inner = self.inner.read().await;
        let Some(payment) = inner
            .by_external_id
            .get(payment_id)
            .and_then(|id| inner.payments.get(id))
        else {
            return Ok(None);
        };

        let mut purchases: Vec<Purchase> = inner
            .purchases
            .values()
            .filter(|p| p.payment_id == payment.id)
            .cloned()
            .collect();
        purchases.sort_by_key(|p| p.purchased_at);
        let mut subscriptions: Vec<Subscription> = inner
            .subscriptions
            .values()
            .filter(|s| s.payment_id == payment.id)
            .cloned()
            .collect();
        subscriptions.sort_by_key(|s| s.created_at);

        Ok(Some(PaymentRecord {
            payment: payment.clone(),
            purchases,
            subscriptions,
        }))
    }

    async fn apply_status_transition(
        &self,
        payment: &Payment,
        status: &PaymentStatus,
    ) -> Result<TransitionOutcome> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let stored = inner
            .payments
            .get_mut(&payment.id)
            .ok_or_else(|| PaymentError::NotFound(format!("payment {}", payment.payment_id)))?;
        if stored.payment_status == *status {
            return Ok(TransitionOutcome::Unchanged);
        }

        let from = std::mem::replace(&mut stored.payment_status, status.clone());
        stored.updated_at = now;

        let owned: HashSet<(String, String)> = inner
            .purchases
            .values()
            .filter(|p| p.payment_id != payment.id && p.status == PurchaseStatus::Completed)
            .map(|p| (p.user_id.clone(), p.prompt_id.clone()))
            .collect();
        for purchase in inner
            .purchases
            .values_mut()
            .filter(|p| p.payment_id == payment.id)
        {
            let already_owned = owned.contains(&(purchase.user_id.clone(), purchase.prompt_id.clone()));
            apply_to_purchase(purchase, status, already_owned, now);
        }
        for subscription in inner
            .subscriptions
            .values_mut()
            .filter(|s| s.payment_id == payment.id)
        {
            apply_to_subscription(subscription, status, now);
        }

        Ok(TransitionOutcome::Applied {
            from,
            to: status.clone(),
        })
    }

    async fn subscriptions_for_user(&self, user_id: &str) -> Result<Vec<Subscription>> {
        let inner = self.inner.read().await;
        let mut subscriptions: Vec<Subscription> = inner
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(subscriptions)
    }

    async fn cancel_subscription(
        &self,
        user_id: &str,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>> {
        let mut inner = self.inner.write().await;
        let Some(subscription) = inner
            .subscriptions
            .get_mut(&subscription_id)
            .filter(|s| s.user_id == user_id)
        else {
            return Ok(None);
        };

        if subscription.status != SubscriptionStatus::Cancelled {
            let now = Utc::now();
            subscription.status = SubscriptionStatus::Cancelled;
            subscription.cancelled_at = Some(now);
            subscription.updated_at = now;
        }
        Ok(Some(subscription.clone()))
    }
}
