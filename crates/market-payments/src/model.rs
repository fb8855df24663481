//! Domain Model
//!
//! Payments, purchases and subscriptions, plus the status vocabularies that
//! connect them.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PaymentError, Result};

/// Status reported by the gateway for one payment.
///
/// Anything the gateway adds later lands in `Unknown` and is mirrored as-is.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PaymentStatus {
    Waiting,
    Confirming,
    Confirmed,
    Sending,
    PartiallyPaid,
    Finished,
    Failed,
    Refunded,
    Expired,
    Unknown(String),
}

impl PaymentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "waiting" => PaymentStatus::Waiting,
            "confirming" => PaymentStatus::Confirming,
            "confirmed" => PaymentStatus::Confirmed,
            "sending" => PaymentStatus::Sending,
            "partially_paid" => PaymentStatus::PartiallyPaid,
            "finished" => PaymentStatus::Finished,
            "failed" => PaymentStatus::Failed,
            "refunded" => PaymentStatus::Refunded,
            "expired" => PaymentStatus::Expired,
            _ => PaymentStatus::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PaymentStatus::Waiting => "waiting",
            PaymentStatus::Confirming => "confirming",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Sending => "sending",
            PaymentStatus::PartiallyPaid => "partially_paid",
            PaymentStatus::Finished => "finished",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Unknown(raw) => raw,
        }
    }

    /// No further transition is expected after these
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Finished
                | PaymentStatus::Failed
                | PaymentStatus::Refunded
                | PaymentStatus::Expired
        )
    }
}

impl From<String> for PaymentStatus {
    fn from(raw: String) -> Self {
        PaymentStatus::parse(&raw)
    }
}

impl From<PaymentStatus> for String {
    fn from(status: PaymentStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Purchase status: `pending` until the gateway speaks, then either
/// `completed` or whatever the gateway last said.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PurchaseStatus {
    Pending,
    Completed,
    Mirrored(PaymentStatus),
}

impl PurchaseStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "pending" => PurchaseStatus::Pending,
            "completed" => PurchaseStatus::Completed,
            other => PurchaseStatus::Mirrored(PaymentStatus::parse(other)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Completed => "completed",
            PurchaseStatus::Mirrored(status) => status.as_str(),
        }
    }
}

impl From<String> for PurchaseStatus {
    fn from(raw: String) -> Self {
        PurchaseStatus::parse(&raw)
    }
}

impl From<PurchaseStatus> for String {
    fn from(status: PurchaseStatus) -> Self {
        status.as_str().to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(SubscriptionStatus::Pending),
            "active" => Ok(SubscriptionStatus::Active),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(PaymentError::Storage(format!(
                "unknown subscription status '{other}'"
            ))),
        }
    }
}

/// Subscription plans
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Monthly,
    Yearly,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Monthly => "monthly",
            Plan::Yearly => "yearly",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "monthly" => Ok(Plan::Monthly),
            "yearly" => Ok(Plan::Yearly),
            other => Err(PaymentError::InvalidPlan(other.to_string())),
        }
    }

    /// Price in USD
    pub fn price(&self) -> Decimal {
        match self {
            Plan::Monthly => dec!(9.99),
            Plan::Yearly => dec!(99.99),
        }
    }

    /// Length of one paid period
    pub fn period(&self) -> Duration {
        match self {
            Plan::Monthly => Duration::days(30),
            Plan::Yearly => Duration::days(365),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Plan::Monthly => "Prompt market monthly subscription",
            Plan::Yearly => "Prompt market yearly subscription",
        }
    }
}

/// The caller, as established by the session layer or the dev bypass
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Catalog entry that can be bought
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: String,
    pub title: String,
    pub price: Decimal,
}

/// One gateway transaction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    /// Gateway-assigned id, the IPN join key
    pub payment_id: String,
    pub payment_status: PaymentStatus,
    pub price_amount: Decimal,
    pub price_currency: String,
    pub pay_currency: String,
    pub pay_amount: Option<Decimal>,
    pub pay_address: Option<String>,
    pub order_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub id: Uuid,
    pub user_id: String,
    pub prompt_id: String,
    pub price: Decimal,
    pub status: PurchaseStatus,
    /// Internal id of the funding payment
    pub payment_id: Uuid,
    pub purchased_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: String,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    /// Internal id of the funding payment
    pub payment_id: Uuid,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A payment with its purchases and subscriptions loaded
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment: Payment,
    pub purchases: Vec<Purchase>,
    pub subscriptions: Vec<Subscription>,
}

impl PaymentRecord {
    /// True if `user_id` owns any purchase or subscription funded by this payment
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.purchases.iter().any(|p| p.user_id == user_id)
            || self.subscriptions.iter().any(|s| s.user_id == user_id)
    }
}

/// What a checkout is for
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntentTarget {
    Prompt(String),
    Plan(Plan),
}
