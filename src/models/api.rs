use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Signed token handed back after a successful login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenResponse {
    pub token: String,
    /// Seconds until the token expires
    pub expires_in: u64,
    pub token_type: String,
}

impl TokenResponse {
    pub fn bearer(token: String, expires_in: u64) -> Self {
        Self {
            token,
            expires_in,
            token_type: "Bearer".to_string(),
        }
    }
}

/// Body of `POST /auth/register`.
///
/// Fields beyond the credentials are stored on the account as given.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub user_name: String,
    pub password: String,
    pub full_name: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<crate::auth::Role>,
    #[serde(flatten)]
    pub profile: serde_json::Map<String, serde_json::Value>,
}

/// Success envelope wrapping every CRUD response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: i32,
    pub data: T,
    pub message: String,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            data,
            message: "Success".to_string(),
        }
    }
}

/// Response for `POST /upload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub file_name: String,
    pub file_path: String,
    pub file_size: u64,
    pub file_type: String,
    pub file_id: String,
}

/// Query of `GET /file`.
#[derive(Debug, Clone, Deserialize)]
pub struct FileQuery {
    #[serde(rename = "objectName")]
    pub object_name: Option<String>,
}

/// Query of `GET /courses/enrolled`. Without `student_id` the caller's own
/// enrollments are listed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnrolledQuery {
    pub student_id: Option<String>,
}

/// Response for `GET /file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUrlResponse {
    pub message: String,
    #[serde(rename = "objectName")]
    pub object_name: String,
    pub url: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall health status ("healthy" or "draining")
    pub status: String,
    /// Application version
    pub version: String,
    pub uptime_seconds: u64,
    /// Response timestamp
    pub timestamp: DateTime<Utc>,
}

/// Runtime details exposed by `GET /debug/runtime`. Never carries secrets.
#[derive(Debug, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub version: String,
    pub uptime_seconds: u64,
    pub service_path: String,
    pub debug_endpoints: bool,
    pub rate_limit_rps: u32,
    pub trusted_proxies: Vec<String>,
    pub public_paths: Vec<String>,
    pub shutdown_grace_secs: u64,
    pub draining: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let body = serde_json::to_value(Envelope::success(vec![1, 2])).unwrap();
        assert_eq!(body["code"], 0);
        assert_eq!(body["message"], "Success");
        assert_eq!(body["data"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_token_response_is_bearer() {
        let body = serde_json::to_value(TokenResponse::bearer("abc".into(), 60)).unwrap();
        assert_eq!(body["token_type"], "Bearer");
        assert_eq!(body["expires_in"], 60);
    }

    #[test]
    fn test_register_keeps_profile_fields() {
        let req: RegisterRequest = serde_json::from_value(serde_json::json!({
            "user_name": "ada",
            "password": "pw",
            "full_name": "Ada L",
            "email": "ada@example.com",
            "bio": "hello"
        }))
        .unwrap();

        assert!(req.role.is_none());
        assert_eq!(req.profile.get("bio").unwrap(), "hello");
    }

    #[test]
    fn test_file_query_uses_camel_case_name() {
        let q: FileQuery = serde_json::from_str(r#"{"objectName":"images/a.png"}"#).unwrap();
        assert_eq!(q.object_name.as_deref(), Some("images/a.png"));
    }
}
