//! Claim set carried by every token.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Point-in-time copy of the user a token was issued for.
///
/// This is never refreshed from the user store; a profile read through a
/// token reflects the user as they were at issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedUser {
    pub id: u64,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    pub user: EmbeddedUser,
}

impl TokenClaims {
    pub fn new(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        user: EmbeddedUser,
        issued_at: u64,
        ttl: Duration,
    ) -> Self {
        Self {
            iss: issuer.into(),
            sub: subject.into(),
            iat: issued_at,
            exp: issued_at.saturating_add(ttl.as_secs()),
            user,
        }
    }

    /// A token stops being valid at the instant `exp` is reached.
    pub const fn is_expired_at(&self, now: u64) -> bool {
        now >= self.exp
    }
}
