//! Login, registration and the current-account endpoint.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use serde_json::Value;
use tracing::instrument;

use crate::auth::{Identity, redact_password};
use crate::error::AppResult;
use crate::models::{EntityKind, Envelope, LoginRequest, RegisterRequest, TokenResponse};
use crate::state::AppState;

/// Exchange a username and password for a bearer token.
///
/// A body that is not a valid login request is 400; any credential failure
/// is a generic 401.
#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Json<TokenResponse>> {
    let Json(request) = payload?;
    let token = state
        .verifier
        .login(&request.username, &request.password)
        .await?;
    Ok(Json(token))
}

/// Create an account. The response never includes the password hash.
#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Envelope<Value>>)> {
    let Json(request) = payload?;
    let created = state.verifier.register(request).await?;
    Ok((StatusCode::CREATED, Json(Envelope::success(created))))
}

/// The account behind the presented token.
#[instrument(skip(state))]
pub async fn me(
    State(state): State<AppState>,
    identity: Identity,
) -> AppResult<Json<Envelope<Value>>> {
    let mut account = state
        .repository
        .read_by_id(EntityKind::Users, identity.subject_id)
        .await?;
    redact_password(&mut account);
    Ok(Json(Envelope::success(account)))
}
