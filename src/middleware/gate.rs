//! Per-request access decision.
//!
//! The gate runs before every handler and decides, from the path and the
//! headers alone:
//!
//! 1. Debug paths (any segment equal to `debug`) are refused with 403 while
//!    debug endpoints are disabled, whatever credentials are presented.
//! 2. Public paths pass without credentials.
//! 3. Everything else needs `Authorization: Bearer <token>`; a verified
//!    token yields the caller's [`Identity`].
//!
//! # Path Matching
//!
//! Public paths use exact string matching against the path below the
//! service prefix. `/health` is public, `/health/` is not.
//!
//! The gate does no I/O and never blocks.

use std::collections::HashSet;
use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

use crate::auth::{Identity, TokenCodec, TokenError};
use crate::error::error_response;

/// Path segment that marks a debug endpoint.
pub const DEBUG_SEGMENT: &str = "debug";

/// Why the gate refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GateRejection {
    #[error("debug endpoints are disabled")]
    DebugDisabled,
    #[error("authorization header is required")]
    MissingAuthorization,
    #[error("invalid authorization header format")]
    InvalidAuthorizationFormat,
    #[error("invalid token: {0}")]
    InvalidToken(TokenError),
}

impl GateRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            GateRejection::DebugDisabled => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Stable label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            GateRejection::DebugDisabled => "debug_disabled",
            GateRejection::MissingAuthorization => "missing_authorization",
            GateRejection::InvalidAuthorizationFormat => "invalid_format",
            GateRejection::InvalidToken(TokenError::Expired) => "token_expired",
            GateRejection::InvalidToken(_) => "invalid_token",
        }
    }
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        let mut response = error_response(self.status(), self.to_string());
        if self.status() == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                header::HeaderValue::from_static("Bearer"),
            );
        }
        response
    }
}

/// Extract the token from an `Authorization` value.
///
/// The value must be exactly two parts separated by one space, the first
/// being `Bearer` and the second non-empty.
pub fn parse_bearer(value: &str) -> Option<&str> {
    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Some(token),
        _ => None,
    }
}

/// True when any segment of `path` is the debug marker.
pub fn is_debug_path(path: &str) -> bool {
    path.split('/').any(|segment| segment == DEBUG_SEGMENT)
}

/// Public paths are matched against the path below the prefix, so an entry
/// without a leading `/` can never match.
fn public_path_set(paths: &[String]) -> HashSet<String> {
    paths
        .iter()
        .filter(|path| {
            let valid = path.starts_with('/');
            if !valid {
                warn!(path = %path, "Ignoring public path without a leading '/'");
            }
            valid
        })
        .cloned()
        .collect()
}

/// The access decision function.
#[derive(Clone)]
pub struct AccessGate {
    codec: Arc<TokenCodec>,
    debug_enabled: bool,
    public_paths: Arc<HashSet<String>>,
}

impl std::fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGate")
            .field("debug_enabled", &self.debug_enabled)
            .field("public_paths", &self.public_paths)
            .finish_non_exhaustive()
    }
}

impl AccessGate {
    pub fn new(codec: Arc<TokenCodec>, debug_enabled: bool, public_paths: &[String]) -> Self {
        Self {
            codec,
            debug_enabled,
            public_paths: Arc::new(public_path_set(public_paths)),
        }
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.contains(path)
    }

    /// Decide on a request.
    ///
    /// Returns `Ok(None)` for a public path, `Ok(Some(identity))` for an
    /// authenticated one.
    pub fn check(&self, path: &str, headers: &HeaderMap) -> Result<Option<Identity>, GateRejection> {
        if !self.debug_enabled && is_debug_path(path) {
            return Err(GateRejection::DebugDisabled);
        }

        if self.is_public(path) {
            return Ok(None);
        }

        let value = headers
            .get(header::AUTHORIZATION)
            .ok_or(GateRejection::MissingAuthorization)?;
        let value = value
            .to_str()
            .map_err(|_| GateRejection::InvalidAuthorizationFormat)?;
        let token = parse_bearer(value).ok_or(GateRejection::InvalidAuthorizationFormat)?;

        let claims = self
            .codec
            .verify(token)
            .map_err(GateRejection::InvalidToken)?;

        Ok(Some(Identity::from(claims)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::auth::Role;
    use crate::config::{DEFAULT_PUBLIC_PATHS, Secret};
    use axum::http::HeaderValue;
    use uuid::Uuid;

    fn codec() -> Arc<TokenCodec> {
        Arc::new(TokenCodec::new(
            &Secret::new("gate-secret"),
            Duration::from_secs(600),
        ))
    }

    fn gate(debug_enabled: bool) -> AccessGate {
        let public: Vec<String> = DEFAULT_PUBLIC_PATHS.iter().map(|s| s.to_string()).collect();
        AccessGate::new(codec(), debug_enabled, &public)
    }

    fn bearer(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn valid_token() -> String {
        let codec = codec();
        codec
            .issue(&codec.claims_for(Uuid::new_v4(), "Ada", Role::Admin))
            .unwrap()
    }

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("Bearer"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("Bearer  x"), None);
        assert_eq!(parse_bearer("Bearer a b"), None);
        assert_eq!(parse_bearer("bearer abc"), None);
        assert_eq!(parse_bearer("Basic abc"), None);
        assert_eq!(parse_bearer(""), None);
    }

    #[test]
    fn test_is_debug_path() {
        assert!(is_debug_path("/debug/telemetry"));
        assert!(is_debug_path("/x/debug"));
        assert!(!is_debug_path("/debugger"));
        assert!(!is_debug_path("/courses"));
    }

    #[test]
    fn test_public_path_passes_without_token() {
        assert_eq!(gate(false).check("/health", &HeaderMap::new()), Ok(None));
        assert_eq!(gate(false).check("/auth/login", &HeaderMap::new()), Ok(None));
    }

    #[test]
    fn test_public_match_is_exact() {
        assert_eq!(
            gate(false).check("/health/", &HeaderMap::new()),
            Err(GateRejection::MissingAuthorization)
        );
    }

    #[test]
    fn test_public_path_without_slash_is_ignored() {
        let public = vec!["health".to_string(), "/ready".to_string()];
        let gate = AccessGate::new(codec(), false, &public);

        assert!(!gate.is_public("health"));
        assert!(gate.is_public("/ready"));
        assert_eq!(
            gate.check("/health", &HeaderMap::new()),
            Err(GateRejection::MissingAuthorization)
        );
    }

    #[test]
    fn test_debug_path_forbidden_even_with_valid_token() {
        let headers = bearer(&format!("Bearer {}", valid_token()));
        let result = gate(false).check("/debug/telemetry", &headers);
        assert_eq!(result, Err(GateRejection::DebugDisabled));
        assert_eq!(
            result.unwrap_err().into_response().status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_enabled_debug_path_still_needs_token() {
        assert_eq!(
            gate(true).check("/debug/telemetry", &HeaderMap::new()),
            Err(GateRejection::MissingAuthorization)
        );
    }

    #[test]
    fn test_missing_header() {
        assert_eq!(
            gate(false).check("/courses", &HeaderMap::new()),
            Err(GateRejection::MissingAuthorization)
        );
    }

    #[test]
    fn test_malformed_headers_are_format_errors() {
        for value in ["Bearer", "Bearer ", "Bearer  x", "Token abc", "Bearer a b"] {
            assert_eq!(
                gate(false).check("/courses", &bearer(value)),
                Err(GateRejection::InvalidAuthorizationFormat),
                "value {value:?}"
            );
        }
    }

    #[test]
    fn test_non_utf8_header_is_format_error() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_bytes(b"Bearer \xfftoken").unwrap(),
        );
        assert_eq!(
            gate(false).check("/courses", &headers),
            Err(GateRejection::InvalidAuthorizationFormat)
        );
    }

    #[test]
    fn test_bad_token_carries_detail() {
        let rejection = gate(false)
            .check("/courses", &bearer("Bearer not.a.jwt"))
            .unwrap_err();
        assert_eq!(rejection, GateRejection::InvalidToken(TokenError::Malformed));
        assert_eq!(rejection.to_string(), "invalid token: token is malformed");
        assert_eq!(
            rejection.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_valid_token_yields_identity() {
        let identity = gate(false)
            .check("/courses", &bearer(&format!("Bearer {}", valid_token())))
            .unwrap()
            .unwrap();
        assert_eq!(identity.display_name, "Ada");
        assert_eq!(identity.role, Role::Admin);
    }
}
