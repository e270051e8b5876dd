//! Backend abstractions for forwarding requests to registered services.

mod http;

pub use self::http::{is_hop_by_hop, HttpBackend};

use ::http::{HeaderMap, Method, StatusCode};
use async_trait::async_trait;
use hyper::body::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::LimitsConfig;
use crate::error::GatewayError;
use crate::registry::ServiceRegistry;

/// Request to be sent to a backend, relative to its base URL.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub method: Method,
    /// Path and optional query, always starting with `/`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BackendRequest {
    /// Body-less `GET`, as used by health probes.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path_and_query: path.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// Fully buffered response from a backend.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A single registered backend.
///
/// One attempt per call; implementations never retry.
#[async_trait]
pub trait ServiceBackend: Send + Sync + std::fmt::Debug {
    /// Send a request and buffer the response.
    ///
    /// Any status code the backend answers with is `Ok`. Errors are
    /// reserved for `UpstreamUnavailable` and `UpstreamTimeout`.
    async fn send(&self, req: BackendRequest) -> Result<BackendResponse, GatewayError>;
}

/// Backends keyed by service key.
#[derive(Debug, Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn ServiceBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an HTTP backend for every registered service.
    pub fn from_registry(
        registry: &ServiceRegistry,
        limits: &LimitsConfig,
    ) -> Result<Self, GatewayError> {
        let mut backends: HashMap<String, Arc<dyn ServiceBackend>> = HashMap::new();

        for service in registry.iter() {
            let backend = HttpBackend::new(&service.key, &service.base_url)?
                .with_connect_timeout(limits.connect_timeout)
                .with_timeout(limits.request_timeout);
            backends.insert(service.key.clone(), Arc::new(backend));
        }

        Ok(Self { backends })
    }

    /// Register or replace the backend for a service.
    #[must_use]
    pub fn with_backend(
        mut self,
        key: impl Into<String>,
        backend: Arc<dyn ServiceBackend>,
    ) -> Self {
        self.backends.insert(key.into(), backend);
        self
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn ServiceBackend>> {
        self.backends.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServiceDescriptor;

    #[derive(Debug)]
    struct Teapot;

    #[async_trait]
    impl ServiceBackend for Teapot {
        async fn send(&self, _req: BackendRequest) -> Result<BackendResponse, GatewayError> {
            Ok(BackendResponse {
                status: StatusCode::IM_A_TEAPOT,
                headers: HeaderMap::new(),
                body: Bytes::new(),
            })
        }
    }

    #[test]
    fn builds_backend_per_service() {
        let registry = ServiceRegistry::new([
            ServiceDescriptor::new("auth", "http://localhost:3002", "Auth", "/api/auth"),
            ServiceDescriptor::new(
                "analytics",
                "http://localhost:3003",
                "Analytics",
                "/api/analytics",
            ),
        ])
        .unwrap();

        let backends = BackendRegistry::from_registry(&registry, &LimitsConfig::default()).unwrap();
        assert!(backends.get("auth").is_some());
        assert!(backends.get("analytics").is_some());
        assert!(backends.get("billing").is_none());
    }

    #[tokio::test]
    async fn with_backend_replaces_existing() {
        let backends = BackendRegistry::new().with_backend("auth", Arc::new(Teapot));
        let response = backends
            .get("auth")
            .unwrap()
            .send(BackendRequest::get("/health"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::IM_A_TEAPOT);
    }
}
