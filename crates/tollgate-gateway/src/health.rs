//! Parallel health probing of registered backends.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::{BackendRegistry, BackendRequest};
use crate::config::HealthConfig;
use crate::error::GatewayError;
use crate::registry::{ServiceDescriptor, ServiceRegistry};

/// Outcome of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Healthy,
    Unreachable,
    TimedOut,
}

/// Result of probing one service.
#[derive(Debug, Clone, Serialize)]
pub struct HealthProbeResult {
    pub key: String,
    pub name: String,
    pub url: String,
    #[serde(rename = "status")]
    pub outcome: ProbeOutcome,
    pub latency_ms: u64,
    /// Backend response body on success, as JSON when it parses.
    #[serde(rename = "response", skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl HealthProbeResult {
    fn new(service: &ServiceDescriptor, outcome: ProbeOutcome, latency: Duration) -> Self {
        Self {
            key: service.key.clone(),
            name: service.display_name.clone(),
            url: service.base_url.clone(),
            outcome,
            latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            payload: None,
            error_message: None,
        }
    }

    fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// One result per registered service, in registry order.
#[derive(Debug, Clone)]
pub struct AggregatedStatus {
    pub gateway_outcome: ProbeOutcome,
    pub per_service: Vec<HealthProbeResult>,
}

impl AggregatedStatus {
    pub fn get(&self, key: &str) -> Option<&HealthProbeResult> {
        self.per_service.iter().find(|result| result.key == key)
    }
}

/// Fans out one probe per registered service and waits for all of them.
#[derive(Debug, Clone)]
pub struct HealthAggregator {
    registry: Arc<ServiceRegistry>,
    backends: Arc<BackendRegistry>,
    probe_timeout: Duration,
    probe_path: String,
}

impl HealthAggregator {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        backends: Arc<BackendRegistry>,
        config: &HealthConfig,
    ) -> Self {
        Self {
            registry,
            backends,
            probe_timeout: config.probe_timeout,
            probe_path: config.probe_path.clone(),
        }
    }

    pub const fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Probe every registered service.
    ///
    /// Never fails on a backend outcome. Probes run concurrently on the
    /// calling task and each is bounded by its own timeout.
    pub async fn check_all(&self) -> AggregatedStatus {
        let probes = self.registry.iter().map(|service| self.probe(service));
        let per_service = join_all(probes).await;

        AggregatedStatus {
            gateway_outcome: ProbeOutcome::Healthy,
            per_service,
        }
    }

    async fn probe(&self, service: &ServiceDescriptor) -> HealthProbeResult {
        let started = Instant::now();

        let Some(backend) = self.backends.get(&service.key) else {
            return HealthProbeResult::new(service, ProbeOutcome::Unreachable, Duration::ZERO)
                .with_error("no backend configured");
        };

        let sent = tokio::time::timeout(
            self.probe_timeout,
            backend.send(BackendRequest::get(self.probe_path.clone())),
        )
        .await;
        let latency = started.elapsed();

        let (outcome, error_message) = match &sent {
            Ok(Ok(response)) if response.status.is_success() => (ProbeOutcome::Healthy, None),
            Ok(Ok(response)) => (
                ProbeOutcome::Unreachable,
                Some(format!("backend responded with status {}", response.status.as_u16())),
            ),
            Ok(Err(GatewayError::UpstreamTimeout { .. })) | Err(_) => (
                ProbeOutcome::TimedOut,
                Some(format!("no response within {}ms", self.probe_timeout.as_millis())),
            ),
            Ok(Err(e)) => (ProbeOutcome::Unreachable, Some(probe_error_message(e))),
        };

        let mut result = HealthProbeResult::new(service, outcome, latency);
        result.error_message = error_message;
        if let (ProbeOutcome::Healthy, Ok(Ok(response))) = (outcome, &sent) {
            result.payload = Some(decode_payload(&response.body));
        }

        if result.outcome == ProbeOutcome::Healthy {
            tracing::debug!(
                service = %service.key,
                latency_ms = result.latency_ms,
                "Probe succeeded"
            );
        } else {
            tracing::warn!(
                service = %service.key,
                outcome = ?result.outcome,
                error = result.error_message.as_deref().unwrap_or_default(),
                "Probe failed"
            );
        }

        result
    }
}

fn probe_error_message(error: &GatewayError) -> String {
    match error {
        GatewayError::UpstreamUnavailable { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

fn decode_payload(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(body).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendResponse, ServiceBackend};
    use async_trait::async_trait;
    use http::{HeaderMap, StatusCode};
    use hyper::body::Bytes;

    #[derive(Debug)]
    enum Scripted {
        Respond(StatusCode, &'static str),
        Refuse,
        Hang,
    }

    #[async_trait]
    impl ServiceBackend for Scripted {
        async fn send(&self, _req: BackendRequest) -> Result<BackendResponse, GatewayError> {
            match self {
                Self::Respond(status, body) => Ok(BackendResponse {
                    status: *status,
                    headers: HeaderMap::new(),
                    body: Bytes::from_static(body.as_bytes()),
                }),
                Self::Refuse => Err(GatewayError::UpstreamUnavailable {
                    service: "x".into(),
                    reason: "connection refused".into(),
                }),
                Self::Hang => std::future::pending().await,
            }
        }
    }

    fn aggregator(scripts: Vec<(&str, Scripted)>) -> HealthAggregator {
        let registry = ServiceRegistry::new(scripts.iter().map(|(key, _)| {
            ServiceDescriptor::new(
                *key,
                format!("http://{key}.internal"),
                *key,
                format!("/api/{key}"),
            )
        }))
        .unwrap();

        let backends = scripts
            .into_iter()
            .fold(BackendRegistry::new(), |backends, (key, script)| {
                backends.with_backend(key, Arc::new(script))
            });

        let config = HealthConfig {
            probe_timeout: Duration::from_millis(50),
            ..HealthConfig::default()
        };
        HealthAggregator::new(Arc::new(registry), Arc::new(backends), &config)
    }

    #[tokio::test]
    async fn one_entry_per_service_in_order() {
        let aggregator = aggregator(vec![
            ("slow", Scripted::Hang),
            ("down", Scripted::Refuse),
            ("up", Scripted::Respond(StatusCode::OK, r#"{"status":"ok"}"#)),
        ]);

        let status = aggregator.check_all().await;
        let keys: Vec<&str> = status.per_service.iter().map(|r| r.key.as_str()).collect();

        assert_eq!(keys, ["slow", "down", "up"]);
        assert_eq!(status.gateway_outcome, ProbeOutcome::Healthy);
        assert_eq!(status.get("slow").unwrap().outcome, ProbeOutcome::TimedOut);
        assert_eq!(status.get("down").unwrap().outcome, ProbeOutcome::Unreachable);
        assert_eq!(
            status.get("down").unwrap().error_message.as_deref(),
            Some("connection refused")
        );

        let up = status.get("up").unwrap();
        assert_eq!(up.outcome, ProbeOutcome::Healthy);
        assert_eq!(up.payload, Some(serde_json::json!({"status": "ok"})));
        assert!(up.error_message.is_none());
    }

    #[tokio::test]
    async fn non_success_status_is_unreachable() {
        let aggregator = aggregator(vec![(
            "auth",
            Scripted::Respond(StatusCode::SERVICE_UNAVAILABLE, "draining"),
        )]);

        let status = aggregator.check_all().await;
        let auth = status.get("auth").unwrap();
        assert_eq!(auth.outcome, ProbeOutcome::Unreachable);
        assert_eq!(
            auth.error_message.as_deref(),
            Some("backend responded with status 503")
        );
    }

    #[tokio::test]
    async fn plain_text_payload_kept_as_string() {
        let aggregator = aggregator(vec![("auth", Scripted::Respond(StatusCode::OK, "OK"))]);
        let status = aggregator.check_all().await;
        assert_eq!(
            status.get("auth").unwrap().payload,
            Some(serde_json::Value::String("OK".into()))
        );
    }

    #[tokio::test]
    async fn empty_registry_yields_empty_status() {
        let aggregator = aggregator(Vec::new());
        let status = aggregator.check_all().await;
        assert!(status.per_service.is_empty());
    }

    #[test]
    fn serialises_with_wire_names() {
        let service = ServiceDescriptor::new("auth", "http://a:1", "Auth", "/api/auth");
        let result =
            HealthProbeResult::new(&service, ProbeOutcome::TimedOut, Duration::from_millis(7))
                .with_error("slow");

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "timed_out");
        assert_eq!(json["latency_ms"], 7);
        assert_eq!(json["error"], "slow");
        assert!(json.get("response").is_none());
    }
}
