//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded (keyed by resolved client address)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Sets / propagates X-Request-Id
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP span per request
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   CORS + Limit   │ ← Cross-origin headers, body size limit
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Gateway (nested  │ ← redacted log → access gate → handler → telemetry
//! │ under prefix)    │   401 / 403 on rejection
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups (below `SERVICE_PATH`)
//!
//! - `/auth/login`, `/auth/register` - Credentials (public)
//! - `/health`, `/ready` - Health & readiness (public)
//! - `/users/me` - The caller's account
//! - `/courses/enrolled`, `/submissions/latest/{student}/{assignment}` - Joined lookups
//! - `/{entity}`, `/{entity}/{id}`, `/{entity}/{relation}/{id}` - CRUD
//! - `/upload`, `/file` - Object storage
//! - `/debug/telemetry`, `/debug/runtime` - Only with `DEBUG_ENDPOINTS=true`

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{Request, StatusCode, Uri};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span};

use crate::error::error_response;
use crate::handlers::{self, RelationRoute};
use crate::middleware::{AccessGate, GatewayLayer, RateLimitError, RateLimitLayer};
use crate::models::EntityKind;
use crate::state::AppState;

/// Header carrying the request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// JSON 404 for paths no route matches.
async fn route_not_found(uri: Uri) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        format!("no route for {}", uri.path()),
    )
}

/// Register CRUD and relation routes for every entity kind.
fn entity_routes(mut router: Router<AppState>) -> Router<AppState> {
    for kind in EntityKind::ALL {
        let collection = format!("/{}", kind.path());
        let item = format!("/{}/{{id}}", kind.path());

        router = router
            .route(
                &collection,
                get(handlers::list_records)
                    .post(handlers::create_record)
                    .layer(Extension(kind)),
            )
            .route(
                &item,
                get(handlers::get_record)
                    .put(handlers::update_record)
                    .delete(handlers::delete_record)
                    .layer(Extension(kind)),
            );

        for relation in kind.relations() {
            let path = format!("/{}/{}/{{id}}", kind.path(), relation.segment);
            router = router.route(
                &path,
                get(handlers::list_related).layer(Extension(RelationRoute {
                    kind,
                    field: relation.field,
                })),
            );
        }
    }
    router
}

/// Routes served below the service prefix, wrapped in the gateway.
fn api_router(state: &AppState) -> Router<AppState> {
    let config = &state.config;

    let mut router = Router::new()
        .route("/auth/login", post(handlers::login))
        .route("/auth/register", post(handlers::register))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/users/me", get(handlers::me))
        .route("/courses/enrolled", get(handlers::enrolled_courses))
        .route(
            "/submissions/latest/{student_id}/{assignment_id}",
            get(handlers::latest_submission),
        )
        .route("/upload", post(handlers::upload_file))
        .route("/file", get(handlers::file_url));

    router = entity_routes(router);

    if config.debug_endpoints {
        info!("Debug endpoints enabled");
        router = router
            .route("/debug/telemetry", get(handlers::telemetry_snapshot))
            .route("/debug/runtime", get(handlers::runtime_info));
    } else {
        info!("Debug endpoints disabled (DEBUG_ENDPOINTS=false)");
    }

    // The fallback sits inside the gateway, so unmatched paths are gated too
    let gate = AccessGate::new(
        state.codec.clone(),
        config.debug_endpoints,
        &config.public_paths,
    );
    router.fallback(route_not_found).layer(GatewayLayer::new(
        gate,
        state.telemetry.clone(),
        state.trusted_proxies.clone(),
    ))
}

/// Build the application router with all routes and middleware configured.
///
/// Serve it through [`LifecycleController::run`], which attaches the peer
/// address the client address resolver needs.
///
/// [`LifecycleController::run`]: crate::lifecycle::LifecycleController::run
///
/// # Errors
///
/// Returns `RateLimitError` if rate limiting configuration is invalid.
pub fn build_router(state: AppState) -> Result<Router, RateLimitError> {
    let config = state.config.clone();

    let api: Router = api_router(&state).with_state(state.clone());
    let mut router = match config.service_prefix() {
        Some(prefix) => {
            info!(prefix, "Serving API below service path");
            Router::new().nest(prefix, api).fallback(route_not_found)
        }
        None => api,
    };

    // =========================================================================
    // Apply Middleware Stack (order matters - applied bottom to top)
    // =========================================================================

    // 1. Request body size limit (uploads included)
    info!(
        max_size_mb = config.max_request_body_size / (1024 * 1024),
        "Request body size limit configured"
    );
    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));

    // 2. CORS
    router = router.layer(build_cors_layer(&config.cors_allowed_origins));

    // 3. Request ID echoed on the response
    router = router.layer(PropagateRequestIdLayer::x_request_id());

    // 4. Tracing, with the request id on the span
    router = router.layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        info_span!(
            "http_request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
        )
    }));

    // 5. Request ID generated when the client sent none
    router = router.layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    // 6. Rate Limiting (if enabled) - applied last, runs first
    if config.rate_limiting_enabled() {
        info!(
            rps = config.rate_limit_rps,
            burst = config.rate_limit_burst,
            trusted_proxies = state.trusted_proxies.len(),
            "Rate limiting enabled"
        );
        router = router.layer(RateLimitLayer::new(
            config.rate_limit_rps,
            config.rate_limit_burst,
            state.trusted_proxies.clone(),
        )?);
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_RPS=0)");
    }

    Ok(router)
}

/// Build CORS layer from configuration.
///
/// `*` allows any origin; otherwise only the listed origins that parse as
/// header values.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<_> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
