//! HTTP Handlers

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use market_payments::{
    gateway::signature::SIGNATURE_HEADER, CheckoutRequest, GatewayPayment, Identity, Payment,
    PaymentError, Subscription,
};

use crate::error::ApiError;
use crate::session::Session;
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub gateway: String,
    pub mock_mode: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPageResponse {
    pub currencies: Vec<String>,
    pub is_mock_mode: bool,
    pub user: Identity,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentResponse {
    pub success: bool,
    pub payment: Payment,
    pub redirect_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    #[serde(default)]
    pub payment_id: Option<String>,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Serialize)]
pub struct SubscriptionsResponse {
    pub subscriptions: Vec<Subscription>,
}

#[derive(Serialize)]
pub struct CancelSubscriptionResponse {
    pub success: bool,
    pub subscription: Subscription,
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        gateway: state.gateway.name().to_string(),
        mock_mode: state.policy.mock_mode(),
    })
}

/// Data for the payment page: accepted currencies and the caller
pub async fn payment_page(
    State(state): State<AppState>,
    Session(session): Session,
) -> ApiResult<PaymentPageResponse> {
    let user = state.policy.authorize(session)?;
    let currencies = state.gateway.list_currencies().await?;

    Ok(Json(PaymentPageResponse {
        currencies,
        is_mock_mode: state.policy.mock_mode(),
        user,
    }))
}

/// Create a payment intent for a prompt or a plan
pub async fn create_payment(
    State(state): State<AppState>,
    Session(session): Session,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> ApiResult<CreatePaymentResponse> {
    let identity = state.policy.authorize(session)?;
    let Json(request) =
        payload.map_err(|e| PaymentError::InvalidRequest(e.body_text()))?;

    let intent = state.intents.create_intent(&identity, &request).await?;

    Ok(Json(CreatePaymentResponse {
        success: true,
        payment: intent.payment,
        redirect_url: intent.redirect_url,
    }))
}

/// Live gateway status for one of the caller's payments
pub async fn payment_status(
    State(state): State<AppState>,
    Session(session): Session,
    Query(query): Query<StatusQuery>,
) -> ApiResult<GatewayPayment> {
    let identity = state.policy.authorize(session)?;
    let payment_id = query
        .payment_id
        .ok_or_else(|| PaymentError::InvalidRequest("paymentId is required".into()))?;

    let status = state.poller.poll(&identity, &payment_id).await?;
    Ok(Json(status))
}

/// Gateway IPN callback
pub async fn payment_ipn(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<SuccessResponse> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    state.ipn.handle(&body, signature).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// The caller's subscriptions
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Session(session): Session,
) -> ApiResult<SubscriptionsResponse> {
    let identity = state.policy.authorize(session)?;
    let subscriptions = state.store.subscriptions_for_user(&identity.user_id).await?;
    Ok(Json(SubscriptionsResponse { subscriptions }))
}

/// Cancel one of the caller's subscriptions
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Session(session): Session,
    Path(id): Path<String>,
) -> ApiResult<CancelSubscriptionResponse> {
    let identity = state.policy.authorize(session)?;
    let not_found = || PaymentError::NotFound(format!("subscription {id}"));

    let subscription_id = Uuid::parse_str(&id).map_err(|_| not_found())?;
    let subscription = state
        .store
        .cancel_subscription(&identity.user_id, subscription_id)
        .await?
        .ok_or_else(not_found)?;

    tracing::info!(
        subscription_id = %subscription.id,
        user_id = %identity.user_id,
        "Subscription cancelled by user"
    );

    Ok(Json(CancelSubscriptionResponse {
        success: true,
        subscription,
    }))
}
