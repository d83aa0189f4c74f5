use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Closed classification of application errors.
///
/// Callers branch on the kind rather than on message text. Each kind maps
/// to exactly one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Invalid,
    Unauthorized,
    Forbidden,
    Upstream,
    Internal,
}

impl ErrorKind {
    /// HTTP status used when an error of this kind reaches a client.
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Invalid => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Upstream | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Application-wide error types.
///
/// # Upstream Errors
///
/// Failures reported by the persistence or object-storage collaborators are
/// surfaced as `Upstream` with the collaborator's text. They are not retried
/// here; retry policy belongs to the collaborator.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Upstream(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Invalid(_) => ErrorKind::Invalid,
            AppError::Unauthorized(_) => ErrorKind::Unauthorized,
            AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::Upstream(_) => ErrorKind::Upstream,
            AppError::Internal(_) | AppError::ConfigError(_) => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Invalid(sanitize_serde_error(&e))
    }
}

/// Error response body for API endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Build a JSON error response with the given status.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, axum::Json(ErrorBody::new(message))).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        match kind {
            ErrorKind::Upstream | ErrorKind::Internal => {
                tracing::error!(error = %self, "Request failed");
            }
            _ => tracing::debug!(error = %self, ?kind, "Request rejected"),
        }

        let message = match self {
            // Configuration details stay in the logs
            AppError::ConfigError(_) => "Service configuration error".to_string(),
            other => other.to_string(),
        };

        error_response(kind.status(), message)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(e) => {
                AppError::Invalid(sanitize_serde_message(&e.body_text()))
            }
            JsonRejection::JsonSyntaxError(_) => {
                AppError::Invalid("Malformed JSON in request body".to_string())
            }
            JsonRejection::MissingJsonContentType(_) => AppError::Invalid(
                "Expected request with `Content-Type: application/json`".to_string(),
            ),
            other => AppError::Invalid(other.body_text()),
        }
    }
}

/// Sanitize serde error messages to avoid leaking internal type information.
///
/// Serde errors can contain internal struct/field names which shouldn't be
/// exposed to external clients. This function extracts the useful parts.
fn sanitize_serde_error(e: &serde_json::Error) -> String {
    sanitize_serde_message(&e.to_string())
}

fn sanitize_serde_message(msg: &str) -> String {
    if msg.contains("missing field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Missing required field: {field}");
    }

    if msg.contains("unknown field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Unknown field: {field}");
    }

    if msg.contains("invalid type") {
        return "Invalid data type in request body".to_string();
    }

    if msg.contains("EOF while parsing") || msg.contains("expected") {
        return "Malformed JSON in request body".to_string();
    }

    "Invalid request format".to_string()
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_status_mapping() {
        assert_eq!(ErrorKind::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::Invalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ErrorKind::Upstream.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_config_error_is_internal() {
        let err = AppError::ConfigError("JWT_SECRET missing".to_string());
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_upstream_message_is_preserved() {
        let err = AppError::Upstream("connection refused".to_string());
        assert_eq!(err.to_string(), "connection refused");
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_serde_missing_field_is_sanitized() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Login {
            username: String,
        }

        let err = serde_json::from_str::<Login>("{}").unwrap_err();
        let app: AppError = err.into();
        assert_eq!(app.kind(), ErrorKind::Invalid);
        assert_eq!(app.to_string(), "Missing required field: username");
    }
}
