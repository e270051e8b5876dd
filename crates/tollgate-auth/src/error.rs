//! Token and user store error types.

use thiserror::Error;

/// Reasons a token could not be issued or accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Authorization header required")]
    MissingHeader,

    #[error("Malformed authorization header")]
    MalformedHeader,

    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Token expired")]
    Expired,

    #[error("Token encoding failed: {0}")]
    Encoding(String),
}

impl TokenError {
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_authorization",
            Self::MalformedHeader => "malformed_authorization",
            Self::Invalid(_) => "invalid_token",
            Self::Expired => "token_expired",
            Self::Encoding(_) => "token_encoding_failed",
        }
    }

    /// True when the token was well-formed and correctly signed but past its expiry.
    pub const fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UserStoreError {
    #[error("Email already registered: {0}")]
    EmailTaken(String),

    #[error("User store unavailable: {0}")]
    Unavailable(String),
}
