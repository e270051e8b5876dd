//! Gateway error types and the JSON error envelope.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tollgate_auth::TokenError;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] TokenError),

    #[error("Route not found: {path}")]
    RouteNotFound {
        path: String,
        available_routes: Vec<String>,
    },

    #[error("Method {method} not allowed on {path}")]
    MethodNotAllowed { method: String, path: String },

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Invalid backend URL: {0}")]
    InvalidBackendUrl(String),

    #[error("Request build failed: {0}")]
    RequestBuildFailed(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Upstream {service} unavailable: {reason}")]
    UpstreamUnavailable { service: String, reason: String },

    #[error("Upstream {service} timed out")]
    UpstreamTimeout { service: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Validation(_) => "validation_error",
            Self::InvalidCredentials => "invalid_credentials",
            Self::Unauthorized(token) => token.error_type(),
            Self::RouteNotFound { .. } => "route_not_found",
            Self::MethodNotAllowed { .. } => "method_not_allowed",
            Self::ServiceNotFound(_) => "service_not_found",
            Self::InvalidBackendUrl(_) => "invalid_backend_url",
            Self::RequestBuildFailed(_) => "request_build_failed",
            Self::PayloadTooLarge => "payload_too_large",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::Internal(_) => "internal_error",
            Self::Io(_) => "io_error",
        }
    }

    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::RouteNotFound { .. } | Self::ServiceNotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Config(_)
            | Self::InvalidBackendUrl(_)
            | Self::RequestBuildFailed(_)
            | Self::Internal(_)
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Backend the error concerns, if any.
    pub fn service(&self) -> Option<&str> {
        match self {
            Self::ServiceNotFound(service)
            | Self::UpstreamUnavailable { service, .. }
            | Self::UpstreamTimeout { service } => Some(service.as_str()),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    service: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    available_routes: Option<&'a [String]>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::warn!(error = %self, error_type = self.error_type(), "Request failed");
        } else {
            tracing::debug!(error = %self, error_type = self.error_type(), "Request rejected");
        }

        // Sanitise error messages for external responses
        let message = match &self {
            Self::Validation(reason) => reason.clone(),
            Self::InvalidCredentials => "Invalid credentials".to_owned(),
            Self::Unauthorized(TokenError::MissingHeader) => {
                "Authorization header required".to_owned()
            }
            Self::Unauthorized(token) => token.to_string(),
            Self::RouteNotFound { path, .. } => format!("Route {path} not found"),
            Self::MethodNotAllowed { .. }
            | Self::ServiceNotFound(_)
            | Self::UpstreamTimeout { .. } => self.to_string(),
            Self::UpstreamUnavailable { service, .. } => {
                format!("Upstream {service} unavailable")
            }
            Self::PayloadTooLarge => "Request body too large".to_owned(),

            // Hide internal details
            Self::Config(_)
            | Self::InvalidBackendUrl(_)
            | Self::RequestBuildFailed(_)
            | Self::Internal(_)
            | Self::Io(_) => "Internal server error".to_owned(),
        };

        let available_routes = match &self {
            Self::RouteNotFound {
                available_routes, ..
            } => Some(available_routes.as_slice()),
            _ => None,
        };

        let envelope = ErrorEnvelope {
            error: self.error_type(),
            message,
            service: self.service(),
            available_routes,
        };

        let mut response = (status, Json(envelope)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"tollgate\""),
            );
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(error: GatewayError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn error_status_codes() {
        assert_eq!(
            GatewayError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::Unauthorized(TokenError::Expired).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::UpstreamUnavailable {
                service: "auth".into(),
                reason: "refused".into()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::UpstreamTimeout {
                service: "auth".into()
            }
            .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::MethodNotAllowed {
                method: "GET".into(),
                path: "/api/auth/login".into()
            }
            .status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[test]
    fn error_types() {
        assert_eq!(GatewayError::InvalidCredentials.error_type(), "invalid_credentials");
        assert_eq!(
            GatewayError::Unauthorized(TokenError::Expired).error_type(),
            "token_expired"
        );
    }

    #[tokio::test]
    async fn internal_details_are_hidden() {
        let (status, body) = body_json(GatewayError::Config("secret path /etc/x".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
        assert_eq!(body["error"], "config_error");
    }

    #[tokio::test]
    async fn upstream_errors_name_the_service() {
        let (status, body) = body_json(GatewayError::UpstreamUnavailable {
            service: "analytics".into(),
            reason: "connection refused (os error 111)".into(),
        })
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["service"], "analytics");
        assert!(!body["message"].as_str().unwrap().contains("os error"));
    }

    #[tokio::test]
    async fn unauthorized_sets_challenge_header() {
        let response = GatewayError::Unauthorized(TokenError::MissingHeader).into_response();
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn route_not_found_lists_routes() {
        let (status, body) = body_json(GatewayError::RouteNotFound {
            path: "/nope".into(),
            available_routes: vec!["/health".into()],
        })
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["available_routes"][0], "/health");
    }
}
