//! Gateway server: shared state, route table and the serve loop.

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{Method, Uri},
    response::{IntoResponse, Response},
    routing::{any, get, post, MethodRouter},
    Json, Router,
};
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tollgate_auth::{Clock, InMemoryUserStore, SystemClock, TokenIssuer, TokenValidator, UserStore};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::backend::BackendRegistry;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::health::{HealthAggregator, HealthProbeResult};
use crate::middleware::SecurityLayer;
use crate::proxy::RequestProxy;
use crate::registry::ServiceRegistry;

/// Shared gateway state.
#[derive(Debug)]
pub struct GatewayState {
    pub(crate) registry: Arc<ServiceRegistry>,
    pub(crate) aggregator: HealthAggregator,
    pub(crate) proxy: RequestProxy,
    pub(crate) issuer: TokenIssuer,
    pub(crate) validator: TokenValidator,
    pub(crate) users: Arc<dyn UserStore>,
    port: u16,
    max_body_size: usize,
    available_routes: Vec<String>,
}

impl GatewayState {
    /// Build state with an HTTP backend per configured service.
    pub fn from_config(
        config: &GatewayConfig,
        users: Arc<dyn UserStore>,
    ) -> Result<Self, GatewayError> {
        let registry = ServiceRegistry::from_config(&config.services)?;
        let backends = BackendRegistry::from_registry(&registry, &config.limits)?;
        Self::assemble(config, registry, backends, users, Arc::new(SystemClock))
    }

    /// Build state around caller-supplied backends and clock.
    pub fn with_backends(
        config: &GatewayConfig,
        backends: BackendRegistry,
        users: Arc<dyn UserStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GatewayError> {
        let registry = ServiceRegistry::from_config(&config.services)?;
        Self::assemble(config, registry, backends, users, clock)
    }

    fn assemble(
        config: &GatewayConfig,
        registry: ServiceRegistry,
        backends: BackendRegistry,
        users: Arc<dyn UserStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GatewayError> {
        let secret = config
            .auth
            .signing_secret()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        for service in registry.iter() {
            if local_route_paths().any(|path| path == service.route_prefix) {
                return Err(GatewayError::Config(format!(
                    "service '{}' prefix {} shadows a gateway route",
                    service.key, service.route_prefix
                )));
            }
        }

        let registry = Arc::new(registry);
        let backends = Arc::new(backends);

        let available_routes = local_route_names()
            .chain(
                registry
                    .iter()
                    .map(|service| format!("ANY {}/*", service.route_prefix)),
            )
            .collect();

        Ok(Self {
            aggregator: HealthAggregator::new(registry.clone(), backends.clone(), &config.health),
            proxy: RequestProxy::new(
                registry.clone(),
                backends,
                config.limits.max_body_size,
            ),
            issuer: TokenIssuer::new(secret, config.auth.issuer.clone())
                .with_ttl(config.auth.token_ttl)
                .with_clock(clock.clone()),
            validator: TokenValidator::new(secret, &config.auth.issuer).with_clock(clock),
            users,
            registry,
            port: config.server.port,
            max_body_size: config.limits.max_body_size,
            available_routes,
        })
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }
}

/// Routes served by the gateway itself: method label, path and handler.
///
/// Any other method on one of these paths is answered with 405.
fn local_routes() -> [(&'static str, &'static str, MethodRouter<Arc<GatewayState>>); 6] {
    [
        ("GET", "/", get(banner)),
        ("GET", "/health", get(liveness)),
        ("GET", "/api/status", get(service_status)),
        ("POST", "/api/auth/register", post(auth::register)),
        ("POST", "/api/auth/login", post(auth::login)),
        ("GET", "/api/auth/profile", get(auth::profile)),
    ]
}

fn local_route_paths() -> impl Iterator<Item = &'static str> {
    local_routes().into_iter().map(|(_, path, _)| path)
}

fn local_route_names() -> impl Iterator<Item = String> {
    local_routes()
        .into_iter()
        .map(|(method, path, _)| format!("{method} {path}"))
}

/// Build the application router.
pub fn router(state: Arc<GatewayState>) -> Router {
    let mut router = Router::new();

    for (_, path, handler) in local_routes() {
        router = router.route(path, handler.fallback(method_not_allowed));
    }

    for service in state.registry.iter() {
        let key: Arc<str> = Arc::from(service.key.as_str());
        let forward = move |State(state): State<Arc<GatewayState>>, request: Request| {
            let key = key.clone();
            async move { state.proxy.forward(request, &key).await }
        };

        router = router
            .route(&service.route_prefix, any(forward.clone()))
            .route(&format!("{}/{{*path}}", service.route_prefix), any(forward));
    }

    let max_body_size = state.max_body_size;

    router
        .fallback(route_not_found)
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(SecurityLayer::new())
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the gateway server until `cancel` fires.
pub async fn run(config: GatewayConfig, cancel: CancellationToken) -> Result<(), GatewayError> {
    let users: Arc<dyn UserStore> = Arc::new(InMemoryUserStore::seeded());
    let state = Arc::new(GatewayState::from_config(&config, users)?);

    for service in state.registry.iter() {
        tracing::info!(
            service = %service.key,
            url = %service.base_url,
            prefix = %service.route_prefix,
            "Service registered"
        );
    }
    tracing::info!(
        issuer = %config.auth.issuer,
        ttl_secs = config.auth.token_ttl.as_secs(),
        "Token issuer configured"
    );

    let app = router(state);

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(GatewayError::Io)?;

    tracing::info!(address = %addr, "Gateway listening");

    let shutdown = cancel.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .into_future();

    let drain_timeout = config.server.shutdown_timeout;
    let deadline = async move {
        cancel.cancelled().await;
        tokio::time::sleep(drain_timeout).await;
    };

    tokio::select! {
        result = server => result.map_err(GatewayError::Io)?,
        () = deadline => {
            tracing::warn!(
                timeout_secs = drain_timeout.as_secs(),
                "In-flight requests did not finish before the shutdown timeout"
            );
        }
    }

    tracing::info!("Gateway shutdown complete");
    Ok(())
}

#[derive(Serialize)]
struct BannerResponse {
    message: &'static str,
    service: &'static str,
    version: &'static str,
    endpoints: BTreeMap<String, String>,
}

async fn banner(State(state): State<Arc<GatewayState>>) -> Json<BannerResponse> {
    let mut endpoints = BTreeMap::new();
    endpoints.insert("health".to_owned(), "/health".to_owned());
    endpoints.insert("status".to_owned(), "/api/status".to_owned());
    for service in state.registry.iter() {
        endpoints.insert(service.key.clone(), format!("{}/*", service.route_prefix));
    }

    Json(BannerResponse {
        message: "API Gateway is running",
        service: "Microservices API Gateway",
        version: env!("CARGO_PKG_VERSION"),
        endpoints,
    })
}

#[derive(Serialize)]
struct LivenessResponse {
    status: &'static str,
    service: &'static str,
    timestamp: String,
    port: u16,
    services: Vec<String>,
}

/// Liveness of this process only. No backend is contacted.
async fn liveness(State(state): State<Arc<GatewayState>>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "OK",
        service: "API Gateway",
        timestamp: chrono::Utc::now().to_rfc3339(),
        port: state.port,
        services: state.registry.keys(),
    })
}

#[derive(Serialize)]
struct GatewaySummary {
    status: &'static str,
    port: u16,
}

#[derive(Serialize)]
struct StatusResponse {
    gateway: GatewaySummary,
    services: Vec<HealthProbeResult>,
}

async fn service_status(State(state): State<Arc<GatewayState>>) -> Json<StatusResponse> {
    let status = state.aggregator.check_all().await;

    Json(StatusResponse {
        gateway: GatewaySummary {
            status: "running",
            port: state.port,
        },
        services: status.per_service,
    })
}

async fn method_not_allowed(method: Method, uri: Uri) -> GatewayError {
    GatewayError::MethodNotAllowed {
        method: method.to_string(),
        path: uri.path().to_owned(),
    }
}

async fn route_not_found(State(state): State<Arc<GatewayState>>, uri: Uri) -> GatewayError {
    GatewayError::RouteNotFound {
        path: uri.path().to_owned(),
        available_routes: state.available_routes.clone(),
    }
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");

    tracing::error!(panic = detail, "Handler panicked");
    GatewayError::Internal(detail.to_owned()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use secrecy::SecretString;

    fn config_with(services: Vec<ServiceConfig>) -> GatewayConfig {
        let mut config = GatewayConfig {
            services,
            ..GatewayConfig::default()
        };
        config.auth.secret = Some(SecretString::from("test-secret"));
        config
    }

    fn users() -> Arc<dyn UserStore> {
        Arc::new(InMemoryUserStore::seeded())
    }

    #[test]
    fn state_requires_secret() {
        let config = GatewayConfig::default();
        let result = GatewayState::from_config(&config, users());
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }

    #[test]
    fn prefix_shadowing_local_route_rejected() {
        let mut service = ServiceConfig::new("status", "http://localhost:1", "Status");
        service.prefix = Some("/api/status".into());

        let result = GatewayState::from_config(&config_with(vec![service]), users());
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }

    #[test]
    fn available_routes_list_local_and_proxied() {
        let config = config_with(GatewayConfig::default().services);
        let state = GatewayState::from_config(&config, users()).unwrap();

        assert!(state.available_routes.contains(&"POST /api/auth/login".to_owned()));
        assert!(state.available_routes.contains(&"ANY /api/analytics/*".to_owned()));
        assert_eq!(state.registry().len(), 2);
    }

    #[test]
    fn panic_payload_becomes_internal_error() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
