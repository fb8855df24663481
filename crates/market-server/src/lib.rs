//! prompt-market payments HTTP server
//!
//! Axum router over the `market-payments` services. The binary in
//! `main.rs` wires configuration and serves it; tests drive [`router`]
//! directly.

pub mod config;
pub mod error;
pub mod handlers;
pub mod session;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    cancel_subscription, create_payment, health_check, list_subscriptions, payment_ipn,
    payment_page, payment_status,
};
pub use crate::state::AppState;

/// Build the application router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health_check))

        // Payments
        .route("/payments", get(payment_page).post(create_payment))
        .route("/payments/status", get(payment_status))
        .route("/payments/ipn", post(payment_ipn))

        // Subscriptions
        .route("/subscriptions", get(list_subscriptions))
        .route("/subscriptions/{id}/cancel", post(cancel_subscription))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
