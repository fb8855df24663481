//! prompt-market payments server

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use market_server::{config::AppConfig, router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    if config.policy.mock_mode() {
        tracing::warn!("⚠ Mock payments active - unauthenticated requests act as the dev user");
    }
    if config.session_secret.is_none() {
        tracing::warn!("⚠ SESSION_SECRET not set - session tokens cannot be verified");
    }
    if config.database_url.is_none() {
        tracing::warn!("⚠ DATABASE_URL not set - using the in-memory store");
    }

    let state = AppState::from_config(&config).await?;
    tracing::info!(gateway = state.gateway.name(), "✓ Payment gateway ready");

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("🚀 market-server running on http://{}", config.bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                      - Health check");
    tracing::info!("  GET  /payments                    - Currencies and caller");
    tracing::info!("  POST /payments                    - Create payment intent");
    tracing::info!("  GET  /payments/status?paymentId=  - Poll payment status");
    tracing::info!("  POST /payments/ipn                - Gateway IPN callback");
    tracing::info!("  GET  /subscriptions               - List subscriptions");
    tracing::info!("  POST /subscriptions/{{id}}/cancel   - Cancel subscription");

    axum::serve(listener, app).await?;

    Ok(())
}
