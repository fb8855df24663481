//! Payment Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// No session, or a session that may not act on the resource
    #[error("Unauthorized")]
    Unauthorized,

    /// Prompt, plan target or payment record absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// The user already owns the prompt
    #[error("Prompt {prompt_id} already purchased by {user_id}")]
    AlreadyPurchased { user_id: String, prompt_id: String },

    /// Plan outside the fixed price table
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// Request body or query is not usable
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// IPN signature missing or wrong
    #[error("IPN signature invalid")]
    InvalidSignature,

    /// Verified IPN without the fields we need
    #[error("Malformed IPN payload: {0}")]
    MalformedPayload(String),

    /// Gateway answered with a non-success status
    #[error("Gateway request failed ({status}): {detail}")]
    GatewayRequest { status: u16, detail: String },

    /// Gateway could not be reached or returned garbage
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Gateway has no payment with this id
    #[error("Gateway payment not found: {0}")]
    PaymentNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    /// Stable machine-readable code returned to clients as `error`
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::Unauthorized => "Unauthorized",
            PaymentError::NotFound(_) => "NotFound",
            PaymentError::AlreadyPurchased { .. } => "AlreadyPurchased",
            PaymentError::InvalidPlan(_) => "InvalidPlan",
            PaymentError::InvalidRequest(_) => "InvalidRequest",
            PaymentError::InvalidSignature => "InvalidSignature",
            PaymentError::MalformedPayload(_) => "MalformedPayload",
            PaymentError::GatewayRequest { .. } => "GatewayRequestError",
            PaymentError::GatewayUnavailable(_) => "GatewayUnavailable",
            PaymentError::PaymentNotFound(_) => "PaymentNotFound",
            PaymentError::Config(_) | PaymentError::Storage(_) | PaymentError::Internal(_) => {
                "InternalError"
            }
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::GatewayUnavailable(_) | PaymentError::Storage(_)
        )
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            PaymentError::Unauthorized => "You must be signed in to do that.",
            PaymentError::NotFound(_) | PaymentError::PaymentNotFound(_) => "Not found.",
            PaymentError::AlreadyPurchased { .. } => "You already own this prompt.",
            PaymentError::InvalidPlan(_) => "Unknown subscription plan.",
            PaymentError::InvalidRequest(_) => "The request was not understood.",
            PaymentError::InvalidSignature => "Invalid signature.",
            PaymentError::MalformedPayload(_) => "Malformed notification.",
            PaymentError::GatewayRequest { .. } | PaymentError::GatewayUnavailable(_) => {
                "Payment processing failed. Please try again."
            }
            _ => "An error occurred processing your request.",
        }
    }

    /// Detail that is safe to hand back to a client.
    ///
    /// Upstream gateway detail is passed through; storage and configuration
    /// internals are not.
    pub fn public_details(&self) -> Option<String> {
        match self {
            PaymentError::NotFound(what) | PaymentError::PaymentNotFound(what) => {
                Some(what.clone())
            }
            PaymentError::InvalidPlan(plan) => Some(plan.clone()),
            PaymentError::InvalidRequest(msg) | PaymentError::MalformedPayload(msg) => {
                Some(msg.clone())
            }
            PaymentError::GatewayRequest { detail, .. } => Some(detail.clone()),
            PaymentError::GatewayUnavailable(msg) => Some(msg.clone()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for PaymentError {
    fn from(err: anyhow::Error) -> Self {
        PaymentError::Internal(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for PaymentError {
    fn from(err: sqlx::Error) -> Self {
        PaymentError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(PaymentError::InvalidSignature.code(), "InvalidSignature");
        assert_eq!(
            PaymentError::GatewayRequest { status: 400, detail: "x".into() }.code(),
            "GatewayRequestError"
        );
        assert_eq!(PaymentError::Storage("db".into()).code(), "InternalError");
    }

    #[test]
    fn test_storage_details_hidden() {
        let err = PaymentError::Storage("password=hunter2".into());
        assert!(err.public_details().is_none());
        assert!(err.is_retryable());
    }
}
