//! Token issuance.

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;

use crate::claims::{EmbeddedUser, TokenClaims};
use crate::clock::{Clock, SystemClock};
use crate::error::TokenError;
use crate::DEFAULT_TOKEN_TTL;

/// A signed token together with the claims it encodes.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
}

/// Signs claim sets with a shared HMAC secret.
#[derive(Clone)]
#[must_use]
pub struct TokenIssuer {
    key: EncodingKey,
    issuer: String,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(secret: &SecretString, issuer: impl Into<String>) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.expose_secret().as_bytes()),
            issuer: issuer.into(),
            ttl: DEFAULT_TOKEN_TTL,
            clock: Arc::new(SystemClock),
        }
    }

    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `subject` embedding a snapshot of `user`.
    ///
    /// Output depends only on the inputs, the secret and the clock reading.
    pub fn issue(&self, subject: &str, user: EmbeddedUser) -> Result<IssuedToken, TokenError> {
        let claims = TokenClaims::new(&self.issuer, subject, user, self.clock.now(), self.ttl);

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.key)
            .map_err(|e| TokenError::Encoding(e.to_string()))?;

        tracing::debug!(subject = %claims.sub, expires_at = claims.exp, "Token issued");

        Ok(IssuedToken { token, claims })
    }
}
