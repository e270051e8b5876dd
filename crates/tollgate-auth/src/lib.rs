//! Stateless bearer tokens for the tollgate gateway.
//!
//! Tokens are HS256-signed JWTs carrying a fixed claim set and a snapshot of
//! the user they were issued for. Validity depends only on the signature and
//! the expiry claim; nothing is stored server-side, so there is no revocation.

pub mod claims;
pub mod clock;
pub mod error;
pub mod issuer;
pub mod users;
pub mod validator;

pub use claims::{EmbeddedUser, TokenClaims};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{TokenError, UserStoreError};
pub use issuer::{IssuedToken, TokenIssuer};
pub use users::{Credentials, InMemoryUserStore, NewUser, User, UserStore};
pub use validator::{bearer_token, TokenValidator};

use std::time::Duration;

/// Issuer claim used when none is configured.
pub const DEFAULT_ISSUER: &str = "auth-service";

/// Token time-to-live.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);
