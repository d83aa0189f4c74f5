//! Health and readiness endpoints.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness with version and uptime
//! - `GET /ready` - Kubernetes-compatible readiness check
//!
//! # Health vs Readiness
//!
//! - **Health** (`/health`): Returns 200 while the process runs, even when
//!   draining; the status field says which
//! - **Readiness** (`/ready`): Returns 503 while draining or when the
//!   repository does not answer, so load balancers stop routing here

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::{instrument, warn};

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "uptime_seconds": 42,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: if state.is_draining() {
            "draining"
        } else {
            "healthy"
        }
        .to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        timestamp: Utc::now(),
    })
}

/// Readiness check endpoint for Kubernetes.
#[instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    if state.is_draining() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    match state.repository.ping().await {
        Ok(()) => Ok(StatusCode::OK),
        Err(e) => {
            warn!(error = %e, "Readiness check: repository unavailable");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
