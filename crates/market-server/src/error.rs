//! HTTP error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use market_payments::PaymentError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Handler error; wraps [`PaymentError`] and picks the status code
#[derive(Debug)]
pub struct ApiError(pub PaymentError);

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            PaymentError::Unauthorized => StatusCode::UNAUTHORIZED,
            PaymentError::NotFound(_) | PaymentError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::AlreadyPurchased { .. } => StatusCode::CONFLICT,
            PaymentError::InvalidPlan(_)
            | PaymentError::InvalidRequest(_)
            | PaymentError::InvalidSignature
            | PaymentError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            PaymentError::GatewayRequest { .. }
            | PaymentError::GatewayUnavailable(_)
            | PaymentError::Config(_)
            | PaymentError::Storage(_)
            | PaymentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(
                code = self.0.code(),
                retryable = self.0.is_retryable(),
                error = %self.0,
                "Request failed"
            );
        }

        let body = ErrorResponse {
            error: self.0.code().into(),
            message: self.0.user_message().into(),
            details: self.0.public_details(),
        };
        (status, Json(body)).into_response()
    }
}
