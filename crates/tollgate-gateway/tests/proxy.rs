//! Forwarding through the gateway to real loopback backends.

mod common;

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::Router;
use common::{call, gateway, service, spawn_backend, test_config, unreachable_addr};
use std::time::Duration;

/// Echoes what it received so assertions can see the forwarded request.
async fn echo(request: Request) -> impl IntoResponse {
    let method = request.method().to_string();
    let uri = request.uri().to_string();
    let custom = request
        .headers()
        .get("x-custom")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    let request_id = request.headers().contains_key("x-request-id");
    let body = axum::body::to_bytes(request.into_body(), 1024).await.unwrap();

    axum::Json(serde_json::json!({
        "method": method,
        "uri": uri,
        "custom": custom,
        "request_id": request_id,
        "body": String::from_utf8_lossy(&body),
    }))
}

fn analytics_backend() -> Router {
    Router::new()
        .route("/", any(echo))
        .route("/{*path}", any(echo))
}

#[tokio::test]
async fn strips_prefix_and_passes_request_through() {
    let addr = spawn_backend(analytics_backend()).await;
    let config = test_config(vec![service("analytics", addr)]);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/analytics/events/page-view?source=web")
        .header("x-custom", "yes")
        .body(Body::from(r#"{"page":"/"}"#))
        .unwrap();

    let response = call(gateway(&config), request).await;
    assert_eq!(response.status, StatusCode::OK);

    let body = response.json();
    assert_eq!(body["method"], "POST");
    assert_eq!(body["uri"], "/events/page-view?source=web");
    assert_eq!(body["custom"], "yes");
    assert_eq!(body["request_id"], true);
    assert_eq!(body["body"], r#"{"page":"/"}"#);
}

#[tokio::test]
async fn bare_prefix_forwards_to_backend_root() {
    let addr = spawn_backend(analytics_backend()).await;
    let config = test_config(vec![service("analytics", addr)]);

    let response = call(gateway(&config), common::get("/api/analytics")).await;
    assert_eq!(response.json()["uri"], "/");
}

#[tokio::test]
async fn backend_error_status_and_body_relayed_verbatim() {
    let backend = Router::new().route(
        "/reports/missing",
        get(|| async {
            let mut headers = HeaderMap::new();
            headers.insert("x-backend", "analytics".parse().unwrap());
            (StatusCode::NOT_FOUND, headers, Bytes::from_static(b"no such report"))
        }),
    );
    let addr = spawn_backend(backend).await;
    let config = test_config(vec![service("analytics", addr)]);

    let response = call(gateway(&config), common::get("/api/analytics/reports/missing")).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.headers["x-backend"], "analytics");
    assert_eq!(response.text(), "no such report");
}

#[tokio::test]
async fn unreachable_backend_is_bad_gateway() {
    let config = test_config(vec![service("analytics", unreachable_addr().await)]);

    let response = call(gateway(&config), common::get("/api/analytics/summary")).await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    let body = response.json();
    assert_eq!(body["error"], "upstream_unavailable");
    assert_eq!(body["service"], "analytics");
}

#[tokio::test]
async fn slow_backend_is_gateway_timeout() {
    let backend = Router::new().route(
        "/summary",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        }),
    );
    let addr = spawn_backend(backend).await;
    let config = test_config(vec![service("analytics", addr)]);

    let response = call(gateway(&config), common::get("/api/analytics/summary")).await;

    assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(response.json()["error"], "upstream_timeout");
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let addr = spawn_backend(analytics_backend()).await;
    let mut config = test_config(vec![service("analytics", addr)]);
    config.limits.max_body_size = 8;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/analytics/events")
        .body(Body::from("0123456789abcdef"))
        .unwrap();

    let response = call(gateway(&config), request).await;
    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn proxied_responses_carry_security_headers() {
    let addr = spawn_backend(analytics_backend()).await;
    let config = test_config(vec![service("analytics", addr)]);

    let response = call(gateway(&config), common::get("/api/analytics/x")).await;
    assert_eq!(response.headers["x-content-type-options"], "nosniff");
}
