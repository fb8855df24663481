//! Authorization Policy
//!
//! The one place that decides whether a request without a session may act
//! as the development identity. Every payment endpoint goes through
//! [`AuthorizationPolicy::authorize`].

use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, Result};
use crate::model::Identity;

/// User id the bypass acts as
pub const DEV_USER_ID: &str = "dev-user";
pub const DEV_USER_EMAIL: &str = "dev@localhost";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPolicy {
    /// Deployment is not production
    pub non_production: bool,

    /// Mock payments requested
    pub mock_payments_enabled: bool,
}

impl AuthorizationPolicy {
    pub fn new(non_production: bool, mock_payments_enabled: bool) -> Self {
        Self {
            non_production,
            mock_payments_enabled,
        }
    }

    /// Production policy: sessions required, real gateway
    pub fn strict() -> Self {
        Self::default()
    }

    /// Both flags must hold; anything else fails closed
    pub fn mock_mode(&self) -> bool {
        self.non_production && self.mock_payments_enabled
    }

    /// Resolve the caller.
    ///
    /// A verified session always wins. Without one, the development
    /// identity is used only in mock mode.
    pub fn authorize(&self, session: Option<Identity>) -> Result<Identity> {
        match session {
            Some(identity) => Ok(identity),
            None if self.mock_mode() => {
                tracing::debug!(user_id = DEV_USER_ID, "Using development identity");
                Ok(Identity::new(DEV_USER_ID).with_email(DEV_USER_EMAIL))
            }
            None => Err(PaymentError::Unauthorized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bypass_requires_both_flags() {
        for (non_production, mock) in [(false, false), (true, false), (false, true)] {
            let policy = AuthorizationPolicy::new(non_production, mock);
            assert!(!policy.mock_mode());
            assert!(matches!(policy.authorize(None), Err(PaymentError::Unauthorized)));
        }

        let policy = AuthorizationPolicy::new(true, true);
        assert_eq!(policy.authorize(None).unwrap().user_id, DEV_USER_ID);
    }

    #[test]
    fn test_session_wins_over_bypass() {
        let policy = AuthorizationPolicy::new(true, true);
        let identity = policy.authorize(Some(Identity::new("alice"))).unwrap();
        assert_eq!(identity.user_id, "alice");

        let identity = AuthorizationPolicy::strict()
            .authorize(Some(Identity::new("bob")))
            .unwrap();
        assert_eq!(identity.user_id, "bob");
    }
}
