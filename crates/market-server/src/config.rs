//! Server Configuration
//!
//! Typed view of the process environment. Parsing goes through a lookup
//! function so tests can feed variables without touching the real
//! environment.

use market_payments::{AuthorizationPolicy, NowPaymentsConfig, PaymentError, Result};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_CALLBACK_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_MOCK_IPN_SECRET: &str = "mock-ipn-secret";

/// `APP_ENV` values that count as non-production
const NON_PRODUCTION_ENVS: &[&str] = &["development", "dev", "test", "local"];

/// Which gateway the server talks to
#[derive(Clone, Debug)]
pub enum GatewayConfig {
    NowPayments(NowPaymentsConfig),
    Mock { ipn_secret: String },
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,

    /// Postgres URL; in-memory store when absent
    pub database_url: Option<String>,

    pub database_max_connections: u32,

    /// Public base URL the gateway calls back to
    pub callback_base_url: String,

    /// HS256 secret for session tokens
    pub session_secret: Option<String>,

    pub policy: AuthorizationPolicy,

    pub gateway: GatewayConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let non_production = non_empty("APP_ENV")
            .is_some_and(|env| NON_PRODUCTION_ENVS.contains(&env.to_lowercase().as_str()));
        let mock_payments_enabled = non_empty("MOCK_PAYMENTS").is_some_and(|v| is_truthy(&v));
        let policy = AuthorizationPolicy::new(non_production, mock_payments_enabled);

        if mock_payments_enabled && !non_production {
            tracing::warn!("MOCK_PAYMENTS ignored outside a non-production APP_ENV");
        }

        let gateway = if policy.mock_mode() {
            GatewayConfig::Mock {
                ipn_secret: non_empty("NOWPAYMENTS_IPN_SECRET")
                    .unwrap_or_else(|| DEFAULT_MOCK_IPN_SECRET.into()),
            }
        } else {
            GatewayConfig::NowPayments(NowPaymentsConfig::from_lookup(&lookup)?)
        };

        let database_max_connections = match non_empty("DATABASE_MAX_CONNECTIONS") {
            Some(v) => v.parse().map_err(|_| {
                PaymentError::Config(format!("DATABASE_MAX_CONNECTIONS is not a number: {v}"))
            })?,
            None => 5,
        };

        Ok(Self {
            bind_addr: non_empty("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            database_url: non_empty("DATABASE_URL"),
            database_max_connections,
            callback_base_url: non_empty("CALLBACK_BASE_URL")
                .unwrap_or_else(|| DEFAULT_CALLBACK_BASE_URL.into()),
            session_secret: non_empty("SESSION_SECRET"),
            policy,
            gateway,
        })
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_production_requires_gateway_credentials() {
        let err = AppConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, PaymentError::Config(_)));

        let config = AppConfig::from_lookup(lookup(&[
            ("NOWPAYMENTS_API_KEY", "key"),
            ("NOWPAYMENTS_IPN_SECRET", "secret"),
            ("MOCK_PAYMENTS", "true"),
        ]))
        .unwrap();
        assert!(!config.policy.mock_mode());
        assert!(matches!(config.gateway, GatewayConfig::NowPayments(_)));
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
    }

    #[test]
    fn test_mock_mode_needs_both_flags() {
        let config = AppConfig::from_lookup(lookup(&[
            ("APP_ENV", "development"),
            ("MOCK_PAYMENTS", "1"),
        ]))
        .unwrap();
        assert!(config.policy.mock_mode());
        assert!(matches!(config.gateway, GatewayConfig::Mock { .. }));

        let err = AppConfig::from_lookup(lookup(&[("APP_ENV", "development")])).unwrap_err();
        assert!(matches!(err, PaymentError::Config(_)));
    }

    #[test]
    fn test_optional_values() {
        let config = AppConfig::from_lookup(lookup(&[
            ("APP_ENV", "test"),
            ("MOCK_PAYMENTS", "true"),
            ("DATABASE_URL", "postgres://localhost/market"),
            ("CALLBACK_BASE_URL", "https://market.example.com"),
            ("SESSION_SECRET", "s3cret"),
            ("BIND_ADDR", "127.0.0.1:8080"),
        ]))
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/market"));
        assert_eq!(config.callback_base_url, "https://market.example.com");
        assert_eq!(config.session_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
    }
}
