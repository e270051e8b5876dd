//! Locally served authentication endpoints.
//!
//! These never reach a backend: credentials are checked against the
//! [`UserStore`](tollgate_auth::UserStore) and tokens are issued and
//! validated in-process.

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tollgate_auth::{Credentials, EmbeddedUser, NewUser, TokenError, User, UserStoreError};

use crate::error::GatewayError;
use crate::server::GatewayState;

#[derive(Debug, Default, Deserialize)]
struct RegisterBody {
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoginBody {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub message: &'static str,
    pub user: User,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub message: &'static str,
    pub user: EmbeddedUser,
}

/// `POST /api/auth/register`
pub async fn register(
    State(state): State<Arc<GatewayState>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<TokenResponse>, GatewayError> {
    let body = read_body(body)?;
    let input: RegisterBody = parse_body(&body);

    let (Some(name), Some(email), Some(password)) = (
        required(input.name),
        required(input.email),
        required(input.password),
    ) else {
        return Err(GatewayError::Validation("Missing required fields".into()));
    };

    let user = state
        .users
        .create_user(NewUser {
            name,
            email,
            password,
        })
        .await
        .map_err(store_error)?;

    tracing::info!(user_id = user.id, "User registered");

    let token = issue_for(&state, &user)?;
    Ok(Json(TokenResponse {
        message: "User registered successfully",
        user,
        token,
    }))
}

/// `POST /api/auth/login`
pub async fn login(
    State(state): State<Arc<GatewayState>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<TokenResponse>, GatewayError> {
    let body = read_body(body)?;
    let input: LoginBody = parse_body(&body);

    let (Some(email), Some(password)) = (required(input.email), required(input.password)) else {
        return Err(GatewayError::Validation("Email and password required".into()));
    };

    let user = state
        .users
        .find_by_credentials(&Credentials { email, password })
        .await
        .map_err(store_error)?
        .ok_or(GatewayError::InvalidCredentials)?;

    tracing::debug!(user_id = user.id, "Login succeeded");

    let token = issue_for(&state, &user)?;
    Ok(Json(TokenResponse {
        message: "Login successful",
        user,
        token,
    }))
}

/// `GET /api/auth/profile`
///
/// Returns the user snapshot embedded in the token, not a fresh lookup.
pub async fn profile(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Json<ProfileResponse>, GatewayError> {
    let header = match headers.get(AUTHORIZATION) {
        None => None,
        Some(value) => Some(value.to_str().map_err(|_| TokenError::MalformedHeader)?),
    };

    let claims = state.validator.validate_header(header)?;

    Ok(Json(ProfileResponse {
        message: "Profile retrieved successfully",
        user: claims.user,
    }))
}

/// Anything that is not a JSON object of the expected shape counts as empty.
fn parse_body<T>(body: &[u8]) -> T
where
    T: for<'de> Deserialize<'de> + Default,
{
    serde_json::from_slice(body).unwrap_or_default()
}

fn read_body(body: Result<Bytes, BytesRejection>) -> Result<Bytes, GatewayError> {
    body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            GatewayError::PayloadTooLarge
        } else {
            GatewayError::Validation(rejection.body_text())
        }
    })
}

fn required(field: Option<String>) -> Option<String> {
    field.filter(|value| !value.trim().is_empty())
}

fn issue_for(state: &GatewayState, user: &User) -> Result<String, GatewayError> {
    state
        .issuer
        .issue(&user.id.to_string(), user.clone().into())
        .map(|issued| issued.token)
        .map_err(|e| GatewayError::Internal(e.to_string()))
}

fn store_error(err: UserStoreError) -> GatewayError {
    match err {
        UserStoreError::EmailTaken(_) => {
            GatewayError::Validation("Email already registered".into())
        }
        UserStoreError::Unavailable(reason) => GatewayError::Internal(reason),
    }
}
