//! Status Transition Rules
//!
//! How one gateway status fans out to the purchases and subscriptions a
//! payment funds. Stores call these inside their transaction; nothing here
//! touches storage.

use chrono::{DateTime, Utc};

use crate::model::{PaymentStatus, Purchase, PurchaseStatus, Subscription, SubscriptionStatus};

/// Result of applying a gateway status to a payment aggregate
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Rows were written
    Applied {
        from: PaymentStatus,
        to: PaymentStatus,
    },
    /// Stored status already matched; nothing was written
    Unchanged,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }
}

/// Purchase statuses an unrecognized gateway status must not be stored as
const RESERVED_PURCHASE_STATUSES: &[&str] = &["pending", "completed"];

/// Purchase status for a gateway status.
///
/// An unrecognized status spelled like one of our own purchase statuses is
/// stored as `gateway_<raw>` so it can never read back as ownership.
pub fn purchase_status_for(status: &PaymentStatus) -> PurchaseStatus {
    match status {
        PaymentStatus::Finished => PurchaseStatus::Completed,
        PaymentStatus::Unknown(raw)
            if RESERVED_PURCHASE_STATUSES
                .iter()
                .any(|reserved| raw.trim().eq_ignore_ascii_case(reserved)) =>
        {
            PurchaseStatus::Mirrored(PaymentStatus::Unknown(format!(
                "gateway_{}",
                raw.trim().to_lowercase()
            )))
        }
        other => PurchaseStatus::Mirrored(other.clone()),
    }
}

/// Subscription status for a gateway status, `None` meaning leave it alone
pub fn subscription_status_for(status: &PaymentStatus) -> Option<SubscriptionStatus> {
    match status {
        PaymentStatus::Finished => Some(SubscriptionStatus::Active),
        PaymentStatus::Failed | PaymentStatus::Expired | PaymentStatus::Refunded => {
            Some(SubscriptionStatus::Cancelled)
        }
        PaymentStatus::Waiting
        | PaymentStatus::Confirming
        | PaymentStatus::Confirmed
        | PaymentStatus::Sending
        | PaymentStatus::PartiallyPaid
        | PaymentStatus::Unknown(_) => None,
    }
}

/// Rewrite a purchase in place for `status`.
///
/// `already_owned` is whether the same user holds another completed purchase
/// of the same prompt. A second finished payment then stays mirrored as
/// `finished` so a user owns a prompt through at most one purchase.
pub fn apply_to_purchase(
    purchase: &mut Purchase,
    status: &PaymentStatus,
    already_owned: bool,
    now: DateTime<Utc>,
) {
    let next = purchase_status_for(status);
    purchase.status = if next == PurchaseStatus::Completed && already_owned {
        tracing::warn!(
            purchase_id = %purchase.id,
            user_id = %purchase.user_id,
            prompt_id = %purchase.prompt_id,
            "Payment finished for a prompt the user already owns; not completing"
        );
        PurchaseStatus::Mirrored(PaymentStatus::Finished)
    } else {
        next
    };
    purchase.updated_at = now;
}

/// Rewrite a subscription in place for `status`.
///
/// Returns false when the status leaves subscriptions untouched.
pub fn apply_to_subscription(
    subscription: &mut Subscription,
    status: &PaymentStatus,
    now: DateTime<Utc>,
) -> bool {
    let Some(next) = subscription_status_for(status) else {
        return false;
    };

    match next {
        SubscriptionStatus::Active => {
            subscription.current_period_end = Some(now + subscription.plan.period());
            subscription.cancelled_at = None;
        }
        SubscriptionStatus::Cancelled => {
            subscription.cancelled_at.get_or_insert(now);
        }
        SubscriptionStatus::Pending => {}
    }
    subscription.status = next;
    subscription.updated_at = now;
    true
}
