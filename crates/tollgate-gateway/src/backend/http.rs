//! HTTP/1 backend for forwarding requests to registered services.

use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue, HOST};
use http::{HeaderMap, Request};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;

use super::{BackendRequest, BackendResponse, ServiceBackend};
use crate::error::GatewayError;

/// Connection-scoped headers that are never forwarded in either direction.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Backend that opens one HTTP/1 connection per request.
#[derive(Debug)]
#[must_use]
pub struct HttpBackend {
    service: String,
    host: String,
    port: u16,
    /// Authority sent as the `Host` header.
    authority: String,
    /// Path component of the base URL, without trailing slash.
    base_path: String,
    connect_timeout: Duration,
    timeout: Duration,
}

impl HttpBackend {
    /// Create a backend for `service` at the given base URL.
    pub fn new(service: impl Into<String>, base_url: &str) -> Result<Self, GatewayError> {
        let (host, port, base_path) = parse_base_url(base_url)?;
        let authority = if port == 80 {
            host.clone()
        } else {
            format!("{host}:{port}")
        };

        Ok(Self {
            service: service.into(),
            host,
            port,
            authority,
            base_path,
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
        })
    }

    /// Set the overall request timeout.
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> GatewayError {
        GatewayError::UpstreamUnavailable {
            service: self.service.clone(),
            reason: reason.to_string(),
        }
    }

    fn timed_out(&self) -> GatewayError {
        GatewayError::UpstreamTimeout {
            service: self.service.clone(),
        }
    }

    fn build_request(&self, req: BackendRequest) -> Result<Request<Full<Bytes>>, GatewayError> {
        let uri = format!("{}{}", self.base_path, req.path_and_query);

        let mut builder = Request::builder().method(req.method).uri(&uri);

        if let Some(headers) = builder.headers_mut() {
            for (name, value) in &req.headers {
                if name != HOST && !is_hop_by_hop(name) {
                    headers.append(name, value.clone());
                }
            }
            let host = HeaderValue::from_str(&self.authority)
                .map_err(|e| GatewayError::RequestBuildFailed(e.to_string()))?;
            headers.insert(HOST, host);
        }

        builder
            .body(Full::new(req.body))
            .map_err(|e| GatewayError::RequestBuildFailed(e.to_string()))
    }

    async fn exchange(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<BackendResponse, GatewayError> {
        let addr = format!("{}:{}", self.host, self.port);

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| self.unavailable(e))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = http1::handshake(io)
            .await
            .map_err(|e| self.unavailable(e))?;

        // Spawn connection driver
        let service = self.service.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(
                    service = %service,
                    error = %e,
                    "Backend connection closed with error"
                );
            }
        });

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| self.unavailable(e))?;

        let status = response.status();
        let mut headers = HeaderMap::with_capacity(response.headers().len());
        for (name, value) in response.headers() {
            if !is_hop_by_hop(name) {
                headers.append(name, value.clone());
            }
        }

        let body = response
            .collect()
            .await
            .map_err(|e| self.unavailable(e))?
            .to_bytes();

        Ok(BackendResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl ServiceBackend for HttpBackend {
    async fn send(&self, req: BackendRequest) -> Result<BackendResponse, GatewayError> {
        let request = self.build_request(req)?;

        tokio::time::timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| self.timed_out())?
    }
}

/// Split an `http://host[:port][/path]` base URL.
fn parse_base_url(base_url: &str) -> Result<(String, u16, String), GatewayError> {
    let uri: hyper::Uri = base_url
        .parse()
        .map_err(|e| GatewayError::InvalidBackendUrl(format!("{e}")))?;

    if uri.scheme_str() != Some("http") {
        return Err(GatewayError::InvalidBackendUrl(format!(
            "unsupported scheme in {base_url}"
        )));
    }

    let host = uri
        .host()
        .ok_or_else(|| GatewayError::InvalidBackendUrl("missing host".into()))?
        .to_owned();

    let port = uri.port_u16().unwrap_or(80);
    let base_path = uri.path().trim_end_matches('/').to_owned();

    Ok((host, port, base_path))
}
