//! Debug endpoints, registered only when `DEBUG_ENDPOINTS=true`.
//!
//! Both still require a bearer token; with debug endpoints disabled the
//! access gate answers 403 before routing.

use axum::Json;
use axum::extract::State;
use tracing::instrument;

use crate::models::{Envelope, RuntimeInfo};
use crate::state::AppState;
use crate::telemetry::RouteSummary;

/// `GET /debug/telemetry` - per-route latency summary, busiest first.
#[instrument(skip(state))]
pub async fn telemetry_snapshot(State(state): State<AppState>) -> Json<Envelope<Vec<RouteSummary>>> {
    Json(Envelope::success(state.telemetry.snapshot()))
}

/// `GET /debug/runtime` - effective non-secret configuration.
#[instrument(skip(state))]
pub async fn runtime_info(State(state): State<AppState>) -> Json<Envelope<RuntimeInfo>> {
    let config = &state.config;
    Json(Envelope::success(RuntimeInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        service_path: config.service_path.clone(),
        debug_endpoints: config.debug_endpoints,
        rate_limit_rps: config.rate_limit_rps,
        trusted_proxies: config.trusted_proxies.clone(),
        public_paths: config.public_paths.clone(),
        shutdown_grace_secs: config.shutdown_grace.as_secs(),
        draining: state.is_draining(),
    }))
}
