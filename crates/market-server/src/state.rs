//! Application State

use std::sync::Arc;

use market_payments::{
    AuthorizationPolicy, IpnHandler, MemoryPaymentStore, MockGateway, NowPaymentsClient,
    PaymentGateway, PaymentIntentService, PaymentStore, PgPaymentStore, Result, StatusPoller,
};

use crate::config::{AppConfig, GatewayConfig};
use crate::session::SessionVerifier;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// NOWPayments client, or the mock in mock mode
    pub gateway: Arc<dyn PaymentGateway>,

    pub store: Arc<dyn PaymentStore>,

    pub intents: Arc<PaymentIntentService>,

    pub ipn: Arc<IpnHandler>,

    pub poller: Arc<StatusPoller>,

    pub policy: AuthorizationPolicy,

    /// Session verifier (None if SESSION_SECRET is unset)
    pub sessions: Option<Arc<SessionVerifier>>,
}

impl AppState {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn PaymentStore>,
        policy: AuthorizationPolicy,
        callback_base_url: &str,
        sessions: Option<SessionVerifier>,
    ) -> Self {
        Self {
            intents: Arc::new(PaymentIntentService::new(
                gateway.clone(),
                store.clone(),
                callback_base_url,
            )),
            ipn: Arc::new(IpnHandler::new(gateway.clone(), store.clone())),
            poller: Arc::new(StatusPoller::new(gateway.clone(), store.clone())),
            gateway,
            store,
            policy,
            sessions: sessions.map(Arc::new),
        }
    }

    /// Build the gateway and store described by `config`
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let gateway: Arc<dyn PaymentGateway> = match &config.gateway {
            GatewayConfig::NowPayments(nowpayments) => {
                Arc::new(NowPaymentsClient::new(nowpayments.clone())?)
            }
            GatewayConfig::Mock { ipn_secret } => Arc::new(MockGateway::new(ipn_secret.clone())),
        };

        let store: Arc<dyn PaymentStore> = match &config.database_url {
            Some(url) => Arc::new(PgPaymentStore::connect(url, config.database_max_connections).await?),
            None => Arc::new(MemoryPaymentStore::new()),
        };

        Ok(Self::new(
            gateway,
            store,
            config.policy.clone(),
            &config.callback_base_url,
            config.session_secret.as_deref().map(SessionVerifier::new),
        ))
    }
}
