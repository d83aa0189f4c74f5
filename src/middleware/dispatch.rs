//! Gateway dispatcher: the fixed pipeline around every API handler.
//!
//! ```text
//! start timer → redacted request log → access gate ─┬─ reject → response
//!                                                   └─ handler → response
//!                                    telemetry sample ←──────────┘
//! ```
//!
//! The layer is applied to the whole API router, fallback included, so
//! no route can skip the gate. The telemetry sample is taken for every
//! request, including gate rejections.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, header};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{Level, debug};

use super::gate::AccessGate;
use super::ip::{TrustedProxyConfig, client_address};
use crate::telemetry::{RequestTelemetry, record_gate_rejection};

/// Headers whose values never reach the logs.
const REDACTED_HEADERS: [&str; 3] = ["authorization", "cookie", "proxy-authorization"];

/// `Debug` view of a header map with credentials masked.
pub struct RedactedHeaders<'a>(pub &'a HeaderMap);

impl fmt::Debug for RedactedHeaders<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in self.0 {
            if REDACTED_HEADERS.contains(&name.as_str()) {
                map.entry(&name.as_str(), &"[redacted]");
            } else {
                map.entry(&name.as_str(), &value.to_str().unwrap_or("[binary]"));
            }
        }
        map.finish()
    }
}

/// Layer composing gate, handler and telemetry.
#[derive(Clone)]
pub struct GatewayLayer {
    gate: AccessGate,
    telemetry: Arc<RequestTelemetry>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl GatewayLayer {
    pub fn new(
        gate: AccessGate,
        telemetry: Arc<RequestTelemetry>,
        trusted_proxies: Arc<TrustedProxyConfig>,
    ) -> Self {
        Self {
            gate,
            telemetry,
            trusted_proxies,
        }
    }
}

impl<S> Layer<S> for GatewayLayer {
    type Service = GatewayService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GatewayService {
            inner,
            gate: self.gate.clone(),
            telemetry: self.telemetry.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Gateway service wrapper.
#[derive(Clone)]
pub struct GatewayService<S> {
    inner: S,
    gate: AccessGate,
    telemetry: Arc<RequestTelemetry>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> GatewayService<S> {
    fn log_request(&self, req: &Request<Body>) {
        // Resolving the client is only worth it when the line is emitted
        if !tracing::enabled!(Level::DEBUG) {
            return;
        }

        let client_ip = client_address(req, &self.trusted_proxies);
        let content_length = req
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        debug!(
            method = %req.method(),
            path = %req.uri().path(),
            client_ip = %client_ip,
            version = ?req.version(),
            content_length,
            headers = ?RedactedHeaders(req.headers()),
            "Request received"
        );
    }
}

impl<S> Service<Request<Body>> for GatewayService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let started = Instant::now();
        let telemetry = self.telemetry.clone();
        let path = req.uri().path().to_string();

        self.log_request(&req);

        match self.gate.check(&path, req.headers()) {
            Err(rejection) => {
                debug!(path = %path, reason = rejection.reason(), "Request refused by gate");
                record_gate_rejection(rejection.reason());

                let response = rejection.into_response();
                telemetry.record(&path, response.status().as_u16(), started.elapsed());
                Box::pin(async move { Ok(response) })
            }
            Ok(identity) => {
                if let Some(identity) = identity {
                    req.extensions_mut().insert(identity);
                }

                let mut inner = self.inner.clone();

                Box::pin(async move {
                    let result = inner.call(req).await;
                    let status = result
                        .as_ref()
                        .map(|r| r.status().as_u16())
                        .unwrap_or(500);
                    telemetry.record(&path, status, started.elapsed());
                    result
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::auth::{Identity, Role, TokenCodec};
    use crate::config::Secret;
    use axum::Router;
    use axum::http::{HeaderValue, StatusCode};
    use axum::routing::get;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn codec() -> Arc<TokenCodec> {
        Arc::new(TokenCodec::new(
            &Secret::new("dispatch-secret"),
            Duration::from_secs(600),
        ))
    }

    fn app(telemetry: Arc<RequestTelemetry>) -> Router {
        let gate = AccessGate::new(codec(), false, &["/health".to_string()]);
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route(
                "/whoami",
                get(|identity: Identity| async move { identity.display_name }),
            )
            .route("/debug/telemetry", get(|| async { "secret" }))
            .layer(GatewayLayer::new(
                gate,
                telemetry,
                Arc::new(TrustedProxyConfig::default()),
            ))
    }

    #[test]
    fn test_redacted_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(header::COOKIE, HeaderValue::from_static("session=xyz"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let rendered = format!("{:?}", RedactedHeaders(&headers));
        assert!(!rendered.contains("abc"));
        assert!(!rendered.contains("xyz"));
        assert!(rendered.contains("[redacted]"));
        assert!(rendered.contains("application/json"));
    }

    #[tokio::test]
    async fn test_public_route_is_served_and_recorded() {
        let telemetry = Arc::new(RequestTelemetry::new());
        let response = app(telemetry.clone())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(telemetry.count_for("/health"), 1);
    }

    #[tokio::test]
    async fn test_rejection_is_recorded() {
        let telemetry = Arc::new(RequestTelemetry::new());
        let response = app(telemetry.clone())
            .oneshot(Request::get("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(telemetry.count_for("/whoami"), 1);
    }

    #[tokio::test]
    async fn test_identity_reaches_handler() {
        let codec = codec();
        let token = codec
            .issue(&codec.claims_for(Uuid::new_v4(), "Grace", Role::Teacher))
            .unwrap();

        let response = app(Arc::new(RequestTelemetry::new()))
            .oneshot(
                Request::get("/whoami")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"Grace");
    }

    #[tokio::test]
    async fn test_unmatched_path_is_gated() {
        let telemetry = Arc::new(RequestTelemetry::new());
        let response = app(telemetry.clone())
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(telemetry.count_for("/nope"), 1);
    }

    #[tokio::test]
    async fn test_debug_route_forbidden() {
        let response = app(Arc::new(RequestTelemetry::new()))
            .oneshot(Request::get("/debug/telemetry").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
