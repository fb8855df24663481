//! # market-payments
//!
//! Crypto payment reconciliation for the prompt marketplace.
//!
//! ## Flow
//!
//! ```text
//! ┌─────────────┐  create   ┌─────────────────┐   IPN    ┌─────────────┐
//! │  Checkout   │──────────▶│  NOWPayments    │─────────▶│ IpnHandler  │
//! │  (intent)   │           │  (gateway)      │◀─────────│ StatusPoller│
//! └─────────────┘           └─────────────────┘   poll   └─────────────┘
//!        │                                                      │
//!        ▼                                                      ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │   PaymentStore: payments ─┬─ purchases                           │
//! │                           └─ subscriptions                       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A payment intent calls the gateway first and only then writes a pending
//! payment with its purchase or subscription. Gateway status changes arrive
//! as signed IPNs or through owner polling; both run the same transition,
//! which is a no-op when the stored status already matches.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use market_payments::{CheckoutRequest, Identity, PaymentIntentService};
//!
//! let intents = PaymentIntentService::new(gateway, store, "https://market.example.com");
//! let intent = intents.create_intent(&Identity::new("user-1"), &CheckoutRequest {
//!     prompt_id: None,
//!     plan: Some("monthly".into()),
//!     pay_currency: "btc".into(),
//! }).await?;
//!
//! // Send the user to: intent.redirect_url
//! ```

pub mod auth;
mod checkout;
mod error;
pub mod gateway;
pub mod model;
mod status;
pub mod store;
pub mod transition;
mod webhook;

pub use auth::AuthorizationPolicy;
pub use checkout::{CheckoutRequest, PaymentIntent, PaymentIntentService, IPN_PATH, PRICE_CURRENCY};
pub use error::{PaymentError, Result};
pub use gateway::{
    CreatePaymentRequest, GatewayPayment, MockGateway, NowPaymentsClient, NowPaymentsConfig,
    PaymentGateway,
};
pub use model::{
    Identity, IntentTarget, Payment, PaymentRecord, PaymentStatus, Plan, Prompt, Purchase,
    PurchaseStatus, Subscription, SubscriptionStatus,
};
pub use status::StatusPoller;
pub use store::{MemoryPaymentStore, PaymentStore};
#[cfg(feature = "postgres")]
pub use store::PgPaymentStore;
pub use transition::TransitionOutcome;
pub use webhook::{IpnHandler, IpnNotification};
