//! Shared helpers for gateway integration tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use secrecy::SecretString;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tollgate_auth::{InMemoryUserStore, UserStore};
use tollgate_gateway::config::ServiceConfig;
use tollgate_gateway::{router, GatewayConfig, GatewayState};
use tower::ServiceExt;

pub const TEST_SECRET: &str = "integration-test-secret";

/// Serve `app` on an ephemeral loopback port.
pub async fn spawn_backend(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app).into_future());
    addr
}

/// An address nothing is listening on.
pub async fn unreachable_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn service(key: &str, addr: SocketAddr) -> ServiceConfig {
    ServiceConfig::new(key, format!("http://{addr}"), format!("{key} service"))
}

/// Configuration with a signing secret and short timeouts.
pub fn test_config(services: Vec<ServiceConfig>) -> GatewayConfig {
    let mut config = GatewayConfig {
        services,
        ..GatewayConfig::default()
    };
    config.auth.secret = Some(SecretString::from(TEST_SECRET));
    config.health.probe_timeout = Duration::from_millis(300);
    config.limits.request_timeout = Duration::from_millis(300);
    config.limits.connect_timeout = Duration::from_millis(300);
    config
}

pub fn seeded_users() -> Arc<dyn UserStore> {
    Arc::new(InMemoryUserStore::seeded())
}

/// Gateway router with real HTTP backends.
pub fn gateway(config: &GatewayConfig) -> Router {
    let state = GatewayState::from_config(config, seeded_users()).unwrap();
    router(Arc::new(state))
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.body.clone()).unwrap()
    }
}

pub async fn call(app: Router, request: Request<Body>) -> TestResponse {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
