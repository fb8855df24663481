//! Payment Record Store
//!
//! Every read and write of payments, purchases and subscriptions goes
//! through [`PaymentStore`]. Implementations must run record creation and
//! status transitions as single atomic units per payment.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::{MemoryPaymentStore, StoreSnapshot};
#[cfg(feature = "postgres")]
pub use postgres::PgPaymentStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::gateway::{CreatePaymentRequest, GatewayPayment};
use crate::model::{Payment, PaymentRecord, PaymentStatus, Plan, Prompt, Subscription};
use crate::transition::TransitionOutcome;

/// Payment record storage trait
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Catalog lookup
    async fn find_prompt(&self, prompt_id: &str) -> Result<Option<Prompt>>;

    /// Whether `user_id` already owns `prompt_id` through a completed purchase
    async fn has_completed_purchase(&self, user_id: &str, prompt_id: &str) -> Result<bool>;

    /// Persist a payment and its pending purchase, atomically
    async fn create_purchase_payment(
        &self,
        external: &GatewayPayment,
        request: &CreatePaymentRequest,
        user_id: &str,
        prompt: &Prompt,
    ) -> Result<Payment>;

    /// Persist a payment and its pending subscription, atomically
    async fn create_subscription_payment(
        &self,
        external: &GatewayPayment,
        request: &CreatePaymentRequest,
        user_id: &str,
        plan: Plan,
    ) -> Result<Payment>;

    /// Payment by gateway id, with purchases and subscriptions loaded
    async fn find_payment_by_external_id(&self, payment_id: &str) -> Result<Option<PaymentRecord>>;

    /// Move a payment and everything it funds to `status`.
    ///
    /// The stored status is re-read inside the transaction; if it already
    /// equals `status` nothing is written and `Unchanged` is returned.
    async fn apply_status_transition(
        &self,
        payment: &Payment,
        status: &PaymentStatus,
    ) -> Result<TransitionOutcome>;

    /// A user's subscriptions, newest first
    async fn subscriptions_for_user(&self, user_id: &str) -> Result<Vec<Subscription>>;

    /// User-initiated cancellation; `None` if the subscription is not theirs
    async fn cancel_subscription(
        &self,
        user_id: &str,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>>;
}

/// Local payment row for a freshly created gateway payment.
///
/// Amounts and currencies come from our request; the gateway only gets to
/// decide the id, status and pay-side details.
pub(crate) fn new_payment(
    external: &GatewayPayment,
    request: &CreatePaymentRequest,
    now: DateTime<Utc>,
) -> Payment {
    Payment {
        id: Uuid::new_v4(),
        payment_id: external.payment_id.clone(),
        payment_status: external.payment_status.clone(),
        price_amount: request.price_amount,
        price_currency: request.price_currency.clone(),
        pay_currency: external
            .pay_currency
            .clone()
            .unwrap_or_else(|| request.pay_currency.clone()),
        pay_amount: external.pay_amount,
        pay_address: external.pay_address.clone(),
        order_id: request.order_id.clone(),
        created_at: now,
        updated_at: now,
    }
}
