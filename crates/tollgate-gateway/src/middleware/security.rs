//! Response hardening and removal of client-supplied forwarding headers.

use axum::http::header::{
    HeaderName, HeaderValue, CONTENT_SECURITY_POLICY, FORWARDED, STRICT_TRANSPORT_SECURITY,
    X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
};
use http::{Request, Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Forwarding headers a client could use to spoof its origin.
const SPOOFABLE_REQUEST_HEADERS: &[&str] = &[
    "x-forwarded-for",
    "x-forwarded-proto",
    "x-forwarded-host",
    "x-real-ip",
];

/// Response headers that leak backend implementation details.
const LEAKY_RESPONSE_HEADERS: &[&str] = &["x-powered-by", "server"];

/// Added to every response unless the handler or backend already set them.
static RESPONSE_HEADERS: [(HeaderName, &str); 4] = [
    (
        STRICT_TRANSPORT_SECURITY,
        "max-age=31536000; includeSubDomains",
    ),
    (X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (X_FRAME_OPTIONS, "DENY"),
    (
        CONTENT_SECURITY_POLICY,
        "default-src 'none'; frame-ancestors 'none'",
    ),
];

/// Tower layer applying [`SecurityService`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SecurityLayer;

impl SecurityLayer {
    pub const fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for SecurityLayer {
    type Service = SecurityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityService { inner }
    }
}

#[derive(Clone, Debug)]
pub struct SecurityService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for SecurityService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let headers = req.headers_mut();
        headers.remove(FORWARDED);
        for name in SPOOFABLE_REQUEST_HEADERS {
            headers.remove(*name);
        }

        // Take the instance that was driven to readiness
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let mut response = inner.call(req).await?;

            let headers = response.headers_mut();
            for name in LEAKY_RESPONSE_HEADERS {
                headers.remove(*name);
            }
            for (name, value) in &RESPONSE_HEADERS {
                headers
                    .entry(name.clone())
                    .or_insert(HeaderValue::from_static(*value));
            }

            Ok(response)
        })
    }
}
