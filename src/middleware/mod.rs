//! HTTP middleware for access control, rate limiting and request telemetry.
//!
//! - **Gateway dispatcher**: access gate, redacted request log and latency
//!   sample around every API handler
//! - **Access gate**: debug-path switch, public paths, bearer tokens
//! - **Rate limiting**: per-client token bucket keyed by resolved address
//! - **Client address**: trusted-proxy aware `X-Forwarded-For` resolution
//!
//! # Architecture
//!
//! ```text
//! Request → Rate Limiter → Request ID → Trace → CORS → Gateway(gate → handler) → Response
//!              ↓                                          ↓
//!          429 Too Many                            401 / 403 JSON error
//! ```

pub mod dispatch;
pub mod gate;
pub mod ip;
pub mod rate_limit;

pub use dispatch::{GatewayLayer, RedactedHeaders};
pub use gate::{AccessGate, GateRejection, parse_bearer};
pub use ip::{TrustedProxyConfig, UNKNOWN_IP, client_address, resolve_client_address};
pub use rate_limit::{RateLimitError, RateLimitLayer};
