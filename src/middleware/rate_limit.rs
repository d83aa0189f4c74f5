//! Per-client rate limiting using the token bucket algorithm.
//!
//! # Algorithm
//!
//! Governor implements the Generic Cell Rate Algorithm (GCRA). Each client
//! address gets its own bucket refilled at `rate_limit_rps` with
//! `rate_limit_burst` capacity.
//!
//! # Keying
//!
//! Buckets are keyed by the address from the trusted-proxy resolver, so a
//! client cannot pick a fresh bucket through `X-Forwarded-For`. The header
//! is ignored unless the socket peer is a trusted proxy, and then only hops
//! inside trusted ranges are skipped.
//!
//! # Response Headers
//!
//! On rate limit exceeded (429):
//! - `Retry-After`: Seconds until the next request will be accepted
//! - `X-RateLimit-Limit`: Configured RPS limit
//! - `X-RateLimit-Remaining`: Always 0

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderValue, Request, Response, StatusCode};
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tower::{Layer, Service};
use tracing::warn;

use super::ip::{TrustedProxyConfig, client_address};
use crate::error::error_response;

/// Error type for rate limit layer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// RPS value cannot be zero.
    ZeroRps,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroRps => write!(
                f,
                "RPS must be greater than 0; leave the layer out for no limiting"
            ),
        }
    }
}

impl std::error::Error for RateLimitError {}

/// Per-address limiter with the default DashMap-backed state store.
type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Rate limiting layer for the Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let trusted = Arc::new(TrustedProxyConfig::new(&config.trusted_proxies));
/// let app = Router::new()
///     .route("/api", get(handler))
///     .layer(RateLimitLayer::new(100, 50, trusted)?);
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<KeyedLimiter>,
    /// Configured RPS limit (for headers)
    limit: u32,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    /// Create a per-client rate limit layer.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitError::ZeroRps` if `rps` is 0.
    pub fn new(
        rps: u32,
        burst: u32,
        trusted_proxies: Arc<TrustedProxyConfig>,
    ) -> Result<Self, RateLimitError> {
        let rps_nonzero = NonZeroU32::new(rps).ok_or(RateLimitError::ZeroRps)?;

        const MIN_BURST: NonZeroU32 = NonZeroU32::MIN;
        let burst_nonzero = NonZeroU32::new(burst).unwrap_or(MIN_BURST);

        let quota = Quota::per_second(rps_nonzero).allow_burst(burst_nonzero);

        Ok(Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            limit: rps,
            trusted_proxies,
        })
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            limit: self.limit,
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<KeyedLimiter>,
    limit: u32,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let limit = self.limit;
        let mut inner = self.inner.clone();

        // governor's keyed limiter needs an owned key
        let client_ip = client_address(&req, &self.trusted_proxies).into_owned();

        Box::pin(async move {
            match limiter.check_key(&client_ip) {
                Ok(_) => inner.call(req).await,
                Err(not_until) => {
                    let wait_time = not_until.wait_time_from(DefaultClock::default().now());
                    let retry_after = wait_time.as_secs().max(1);

                    warn!(
                        client_ip = %client_ip,
                        path = %req.uri().path(),
                        retry_after_secs = retry_after,
                        "Rate limit exceeded"
                    );

                    let mut response = error_response(
                        StatusCode::TOO_MANY_REQUESTS,
                        "Rate limit exceeded. Please retry later.",
                    );
                    let headers = response.headers_mut();
                    headers.insert("retry-after", HeaderValue::from(retry_after));
                    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
                    headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));

                    Ok(response)
                }
            }
        })
    }
}
