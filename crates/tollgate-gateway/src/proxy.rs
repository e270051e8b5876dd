//! Forwarding of inbound requests to the backend selected by path prefix.

use axum::{
    body::Body,
    extract::Request,
    http::{header::HeaderName, HeaderValue, Uri},
    response::Response,
};
use http_body_util::LengthLimitError;
use std::sync::Arc;

use crate::backend::{BackendRegistry, BackendRequest, BackendResponse};
use crate::error::GatewayError;
use crate::registry::ServiceRegistry;

/// Header carrying the per-request correlation id.
pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Relays requests to registered backends. One attempt per request.
#[derive(Debug, Clone)]
pub struct RequestProxy {
    registry: Arc<ServiceRegistry>,
    backends: Arc<BackendRegistry>,
    max_body_size: usize,
}

impl RequestProxy {
    pub const fn new(
        registry: Arc<ServiceRegistry>,
        backends: Arc<BackendRegistry>,
        max_body_size: usize,
    ) -> Self {
        Self {
            registry,
            backends,
            max_body_size,
        }
    }

    /// Forward `request` to `service_key` with its route prefix removed.
    ///
    /// Any status the backend answers with is relayed unchanged. Only a
    /// failure to get an answer is an error.
    pub async fn forward(
        &self,
        request: Request,
        service_key: &str,
    ) -> Result<Response, GatewayError> {
        let service = self.registry.resolve(service_key)?;
        let backend = self
            .backends
            .get(service_key)
            .ok_or_else(|| GatewayError::ServiceNotFound(service_key.to_owned()))?;

        let (parts, body) = request.into_parts();
        let path_and_query = upstream_path(&service.route_prefix, &parts.uri);

        let body = axum::body::to_bytes(body, self.max_body_size)
            .await
            .map_err(body_error)?;

        let mut headers = parts.headers;
        if !headers.contains_key(&X_REQUEST_ID) {
            let request_id = uuid::Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                headers.insert(X_REQUEST_ID.clone(), value);
            }
        }

        tracing::debug!(
            service = %service.key,
            method = %parts.method,
            upstream = %path_and_query,
            "Forwarding request"
        );

        let response = backend
            .send(BackendRequest {
                method: parts.method,
                path_and_query,
                headers,
                body,
            })
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    service = %service.key,
                    error_type = e.error_type(),
                    error = %e,
                    "Proxy request failed"
                );
            })?;

        Ok(into_response(response))
    }
}

/// Path and query to request upstream once `prefix` is removed.
///
/// An empty remainder becomes `/`.
pub fn upstream_path(prefix: &str, uri: &Uri) -> String {
    let path = uri.path();
    let remainder = path.strip_prefix(prefix).unwrap_or(path);

    let mut upstream = if remainder.is_empty() {
        "/".to_owned()
    } else if remainder.starts_with('/') {
        remainder.to_owned()
    } else {
        format!("/{remainder}")
    };

    if let Some(query) = uri.query() {
        upstream.push('?');
        upstream.push_str(query);
    }
    upstream
}

fn body_error(err: axum::Error) -> GatewayError {
    let inner = err.into_inner();

    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&*inner);
    while let Some(error) = source {
        if error.is::<LengthLimitError>() {
            return GatewayError::PayloadTooLarge;
        }
        source = error.source();
    }

    GatewayError::Validation(format!("Failed to read request body: {inner}"))
}

fn into_response(backend: BackendResponse) -> Response {
    let mut response = Response::new(Body::from(backend.body));
    *response.status_mut() = backend.status;
    *response.headers_mut() = backend.headers;
    response
}
