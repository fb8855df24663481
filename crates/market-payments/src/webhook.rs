//! IPN Handling
//!
//! Instant payment notifications from the gateway. The signature is checked
//! against the raw body before anything touches the store.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{PaymentError, Result};
use crate::gateway::PaymentGateway;
use crate::model::PaymentStatus;
use crate::store::PaymentStore;
use crate::transition::TransitionOutcome;

/// The fields of an IPN body we act on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpnNotification {
    pub payment_id: String,
    pub payment_status: PaymentStatus,
}

#[derive(Deserialize)]
struct RawNotification {
    payment_id: Option<Value>,
    payment_status: Option<String>,
}

impl IpnNotification {
    /// Parse an IPN body. `payment_id` may arrive as a number or a string.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let raw: RawNotification = serde_json::from_slice(body)
            .map_err(|e| PaymentError::MalformedPayload(format!("invalid JSON: {e}")))?;

        let payment_id = match raw.payment_id {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(PaymentError::MalformedPayload("missing payment_id".into())),
        };

        let payment_status = raw
            .payment_status
            .filter(|s| !s.trim().is_empty())
            .map(|s| PaymentStatus::parse(&s))
            .ok_or_else(|| PaymentError::MalformedPayload("missing payment_status".into()))?;

        Ok(Self {
            payment_id,
            payment_status,
        })
    }
}

/// Verifies and applies IPNs
pub struct IpnHandler {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn PaymentStore>,
}

impl IpnHandler {
    pub fn new(gateway: Arc<dyn PaymentGateway>, store: Arc<dyn PaymentStore>) -> Self {
        Self { gateway, store }
    }

    /// Handle one notification.
    ///
    /// Errors map to responses as: `InvalidSignature` and
    /// `MalformedPayload` 400, `NotFound` 404. Redelivery of a status we
    /// already hold returns `Unchanged`.
    pub async fn handle(&self, body: &[u8], signature: Option<&str>) -> Result<TransitionOutcome> {
        let signature = signature.map(str::trim).filter(|s| !s.is_empty());
        let verified = signature.is_some_and(|sig| self.gateway.verify_ipn_signature(body, sig));
        if !verified {
            tracing::warn!(
                gateway = self.gateway.name(),
                has_signature = signature.is_some(),
                "Rejected IPN with invalid signature"
            );
            return Err(PaymentError::InvalidSignature);
        }

        let notification = IpnNotification::parse(body).inspect_err(|e| {
            tracing::warn!(error = %e, "Rejected malformed IPN");
        })?;

        let Some(record) = self
            .store
            .find_payment_by_external_id(&notification.payment_id)
            .await?
        else {
            tracing::warn!(payment_id = %notification.payment_id, "IPN for unknown payment");
            return Err(PaymentError::NotFound(format!(
                "payment {}",
                notification.payment_id
            )));
        };

        let outcome = self
            .store
            .apply_status_transition(&record.payment, &notification.payment_status)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    payment_id = %notification.payment_id,
                    error = %e,
                    "Failed to apply IPN status"
                );
            })?;

        match &outcome {
            TransitionOutcome::Applied { from, to } => tracing::info!(
                payment_id = %notification.payment_id,
                from = %from,
                to = %to,
                source = "ipn",
                "Payment status changed"
            ),
            TransitionOutcome::Unchanged => tracing::debug!(
                payment_id = %notification.payment_id,
                status = %notification.payment_status,
                "IPN repeated current status"
            ),
        }

        Ok(outcome)
    }
}
