//! Session Tokens
//!
//! The auth service issues HS256 tokens carrying the user id in `sub`.
//! Verification here only establishes *who* is calling; whether an absent
//! session is acceptable is the [`AuthorizationPolicy`]'s call.
//!
//! [`AuthorizationPolicy`]: market_payments::AuthorizationPolicy

use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use market_payments::{Identity, PaymentError, Result};

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: i64,
}

#[derive(Clone)]
pub struct SessionVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
}

impl SessionVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Identity for a valid, unexpired token
    pub fn verify(&self, token: &str) -> Option<Identity> {
        let validation = Validation::new(Algorithm::HS256);
        match decode::<SessionClaims>(token, &self.decoding, &validation) {
            Ok(data) if !data.claims.sub.is_empty() => {
                let identity = Identity::new(data.claims.sub);
                Some(match data.claims.email {
                    Some(email) => identity.with_email(email),
                    None => identity,
                })
            }
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Rejected session token");
                None
            }
        }
    }

    /// Sign a token for `identity`, valid for `ttl`
    pub fn issue(&self, identity: &Identity, ttl: chrono::Duration) -> Result<String> {
        let claims = SessionClaims {
            sub: identity.user_id.clone(),
            email: identity.email.clone(),
            exp: (chrono::Utc::now() + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| PaymentError::Internal(format!("token signing failed: {e}")))
    }
}

/// Caller identity from `Authorization: Bearer`, if any.
///
/// Never rejects; a missing or bad token is `Session(None)`.
#[derive(Clone, Debug)]
pub struct Session(pub Option<Identity>);

impl FromRequestParts<AppState> for Session {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let Some(verifier) = state.sessions.as_ref() else {
            return Ok(Self(None));
        };

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty());

        Ok(Self(token.and_then(|t| verifier.verify(t))))
    }
}
