//! Username/password verification and account registration.
//!
//! # Enumeration Resistance
//!
//! Login answers "invalid credentials" for both an unknown username and a
//! wrong password. An unknown username still pays for one bcrypt verify
//! against a dummy hash so the two cases take the same time. The cause is
//! only visible in the logs.
//!
//! bcrypt is CPU-bound and always runs on the blocking pool.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{Role, TokenCodec};
use crate::error::{AppError, AppResult};
use crate::models::{EntityKind, RegisterRequest, TokenResponse};
use crate::store::{Filter, FilterOp, Record, Repository};

const INVALID_CREDENTIALS: &str = "invalid credentials";
const PASSWORD_FIELD: &str = "password";
const DUMMY_PASSWORD: &str = "timing-equalisation-only";

/// Hash a password on the blocking pool.
pub async fn hash_password(password: String, cost: u32) -> AppResult<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AppError::Internal(format!("password hashing task failed: {e}")))?
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

/// Verify a password on the blocking pool. A corrupt stored hash counts as
/// a mismatch.
async fn verify_password(password: String, hash: String) -> AppResult<bool> {
    let outcome = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("password verification task failed: {e}")))?;

    Ok(outcome.unwrap_or_else(|e| {
        error!(error = %e, "Stored password hash is unreadable");
        false
    }))
}

/// Strip the password hash from a record before it leaves the service.
pub fn redact_password(value: &mut Value) {
    if let Value::Object(fields) = value {
        fields.remove(PASSWORD_FIELD);
    }
}

/// Checks credentials against stored accounts and issues identity tokens.
pub struct CredentialVerifier {
    repository: Arc<dyn Repository>,
    codec: Arc<TokenCodec>,
    cost: u32,
    dummy_hash: String,
}

impl CredentialVerifier {
    /// Build a verifier. Computes the dummy hash once at the configured cost.
    pub fn new(
        repository: Arc<dyn Repository>,
        codec: Arc<TokenCodec>,
        cost: u32,
    ) -> AppResult<Self> {
        let dummy_hash = bcrypt::hash(DUMMY_PASSWORD, cost)
            .map_err(|e| AppError::ConfigError(format!("invalid password hash cost: {e}")))?;

        Ok(Self {
            repository,
            codec,
            cost,
            dummy_hash,
        })
    }

    /// Verify `username`/`password` and issue a bearer token.
    ///
    /// # Errors
    ///
    /// `Unauthorized("invalid credentials")` for any credential failure;
    /// `Internal` if token signing or the blocking pool fails.
    pub async fn login(&self, username: &str, password: &str) -> AppResult<TokenResponse> {
        let account = match self.find_account(username).await {
            Ok(account) => account,
            Err(e) => {
                error!(error = %e, "Account lookup failed during login");
                None
            }
        };

        let Some(account) = account else {
            // Equalise timing with the known-user path
            let _ = verify_password(password.to_string(), self.dummy_hash.clone()).await?;
            warn!(username, "Login rejected: unknown username");
            return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        };

        let stored_hash = account
            .get(PASSWORD_FIELD)
            .and_then(Value::as_str)
            .unwrap_or(self.dummy_hash.as_str())
            .to_string();

        if !verify_password(password.to_string(), stored_hash).await? {
            warn!(username, "Login rejected: password mismatch");
            return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        }

        let subject = account
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| AppError::Internal("stored account has no valid id".to_string()))?;

        let display_name = account
            .get("full_name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .unwrap_or(username);

        let role = account
            .get("role")
            .and_then(Value::as_str)
            .map(|r| {
                r.parse::<Role>().unwrap_or_else(|e| {
                    warn!(%subject, error = %e, "Account has unknown role, using student");
                    Role::Student
                })
            })
            .unwrap_or_default();

        let claims = self.codec.claims_for(subject, display_name, role);
        let token = self.codec.issue(&claims)?;

        info!(%subject, %role, "Login succeeded");
        Ok(TokenResponse::bearer(token, self.codec.ttl_secs()))
    }

    /// Create an account. Rejects duplicate usernames; the stored record
    /// holds only the bcrypt hash.
    pub async fn register(&self, request: RegisterRequest) -> AppResult<Value> {
        let RegisterRequest {
            user_name,
            password,
            full_name,
            email,
            role,
            mut profile,
        } = request;

        if user_name.trim().is_empty() || password.is_empty() {
            return Err(AppError::Invalid(
                "user_name and password are required".to_string(),
            ));
        }

        self.ensure_unique_username(&user_name, None).await?;

        let hash = hash_password(password, self.cost).await?;

        profile.insert("user_name".to_string(), Value::String(user_name));
        profile.insert("full_name".to_string(), Value::String(full_name));
        profile.insert("email".to_string(), Value::String(email));
        profile.insert(
            "role".to_string(),
            Value::String(role.unwrap_or_default().as_str().to_string()),
        );
        profile.insert(PASSWORD_FIELD.to_string(), Value::String(hash));

        let mut created = self.repository.create(EntityKind::Users, profile).await?;
        redact_password(&mut created);

        info!(id = %created["id"], "Account registered");
        Ok(created)
    }

    /// Reject `user_name` if another account holds it. `own_id` is the
    /// account being updated, which may keep its own name.
    pub async fn ensure_unique_username(
        &self,
        user_name: &str,
        own_id: Option<Uuid>,
    ) -> AppResult<()> {
        let mut filter = Filter::eq("user_name", user_name)?;
        if let Some(id) = own_id {
            filter = filter.and("id", FilterOp::Ne, id.to_string())?;
        }

        let taken = !self
            .repository
            .read_filtered(EntityKind::Users, &filter)
            .await?
            .is_empty();
        if taken {
            debug!(user_name, "Username already taken");
            return Err(AppError::Invalid("username already exists".to_string()));
        }
        Ok(())
    }

    /// Prepare a user record written through the generic CRUD routes.
    ///
    /// `own_id` is `None` on create, where a password is required, and the
    /// record's id on update.
    pub async fn prepare_user_record(
        &self,
        record: &mut Record,
        own_id: Option<Uuid>,
    ) -> AppResult<()> {
        match record.get("user_name") {
            Some(Value::String(user_name)) => {
                self.ensure_unique_username(user_name, own_id).await?;
            }
            Some(_) => {
                return Err(AppError::Invalid("user_name must be a string".to_string()));
            }
            None => {}
        }
        self.hash_record_password(record, own_id.is_none()).await
    }

    /// Replace a plaintext `password` in a user record with its hash.
    ///
    /// With `required`, a record lacking a password is rejected.
    async fn hash_record_password(&self, record: &mut Record, required: bool) -> AppResult<()> {
        match record.remove(PASSWORD_FIELD) {
            Some(Value::String(plain)) if !plain.is_empty() => {
                let hash = hash_password(plain, self.cost).await?;
                record.insert(PASSWORD_FIELD.to_string(), Value::String(hash));
                Ok(())
            }
            Some(_) => Err(AppError::Invalid(
                "password must be a non-empty string".to_string(),
            )),
            None if required => Err(AppError::Invalid("password is required".to_string())),
            None => Ok(()),
        }
    }

    async fn find_account(&self, username: &str) -> AppResult<Option<Value>> {
        let filter = Filter::eq("user_name", username)?;
        let mut matches = self
            .repository
            .read_filtered(EntityKind::Users, &filter)
            .await?;
        Ok(matches.pop())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::Secret;
    use crate::store::InMemoryRepository;

    fn verifier() -> (CredentialVerifier, Arc<InMemoryRepository>, Arc<TokenCodec>) {
        let repo = Arc::new(InMemoryRepository::new());
        let codec = Arc::new(TokenCodec::new(
            &Secret::new("test-secret"),
            Duration::from_secs(3600),
        ));
        let verifier =
            CredentialVerifier::new(repo.clone(), codec.clone(), crate::config::MIN_HASH_COST).unwrap();
        (verifier, repo, codec)
    }

    fn register_request(user: &str, password: &str) -> RegisterRequest {
        serde_json::from_value(serde_json::json!({
            "user_name": user,
            "password": password,
            "full_name": "Ada Lovelace",
            "email": "ada@example.com",
            "role": "teacher"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let (verifier, _, codec) = verifier();
        let created = verifier
            .register(register_request("ada", "hunter2"))
            .await
            .unwrap();
        assert!(created.get("password").is_none());

        let response = verifier.login("ada", "hunter2").await.unwrap();
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.expires_in, 3600);

        let claims = codec.verify(&response.token).unwrap();
        assert_eq!(claims.name, "Ada Lovelace");
        assert_eq!(claims.role, Role::Teacher);
        assert_eq!(claims.sub.to_string(), created["id"].as_str().unwrap());
    }

    #[tokio::test]
    async fn test_register_stores_hash_not_plaintext() {
        let (verifier, repo, _) = verifier();
        verifier
            .register(register_request("ada", "hunter2"))
            .await
            .unwrap();

        let stored = repo
            .read_filtered(EntityKind::Users, &Filter::eq("user_name", "ada").unwrap())
            .await
            .unwrap();
        let hash = stored[0]["password"].as_str().unwrap();
        assert_ne!(hash, "hunter2");
        assert!(bcrypt::verify("hunter2", hash).unwrap());
    }

    #[tokio::test]
    async fn test_register_duplicate_username_is_rejected() {
        let (verifier, _, _) = verifier();
        verifier
            .register(register_request("ada", "one"))
            .await
            .unwrap();

        let err = verifier
            .register(register_request("ada", "two"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn test_user_record_name_must_be_unique() {
        let (verifier, repo, _) = verifier();
        let ada = verifier
            .register(register_request("ada", "one"))
            .await
            .unwrap();
        let ada_id = Uuid::parse_str(ada["id"].as_str().unwrap()).unwrap();

        let mut clash = Record::new();
        clash.insert("user_name".into(), Value::String("ada".into()));
        clash.insert("password".into(), Value::String("two".into()));
        let err = verifier
            .prepare_user_record(&mut clash, None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "username already exists");

        // Keeping its own name on update is fine
        let mut same = Record::new();
        same.insert("user_name".into(), Value::String("ada".into()));
        verifier
            .prepare_user_record(&mut same, Some(ada_id))
            .await
            .unwrap();

        // Taking another account's name on update is not
        let grace = repo
            .create(
                EntityKind::Users,
                serde_json::from_value(serde_json::json!({"user_name": "grace"})).unwrap(),
            )
            .await
            .unwrap();
        let grace_id = Uuid::parse_str(grace["id"].as_str().unwrap()).unwrap();
        let err = verifier
            .ensure_unique_username("ada", Some(grace_id))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn test_unknown_user_and_wrong_password_are_indistinguishable() {
        let (verifier, _, _) = verifier();
        verifier
            .register(register_request("ada", "hunter2"))
            .await
            .unwrap();

        let unknown = verifier.login("nobody", "hunter2").await.unwrap_err();
        let wrong = verifier.login("ada", "wrong").await.unwrap_err();

        assert_eq!(unknown.kind(), wrong.kind());
        assert_eq!(unknown.to_string(), wrong.to_string());
        assert_eq!(unknown.to_string(), "invalid credentials");
    }

    #[tokio::test]
    async fn test_hash_record_password() {
        let (verifier, _, _) = verifier();

        let mut record = Record::new();
        record.insert("password".into(), Value::String("pw".into()));
        verifier
            .hash_record_password(&mut record, true)
            .await
            .unwrap();
        assert_ne!(record["password"], "pw");

        let mut missing = Record::new();
        assert!(
            verifier
                .hash_record_password(&mut missing, true)
                .await
                .is_err()
        );
        assert!(
            verifier
                .hash_record_password(&mut missing, false)
                .await
                .is_ok()
        );
    }

    #[test]
    fn test_redact_password() {
        let mut value = serde_json::json!({"user_name": "ada", "password": "$2b$..."});
        redact_password(&mut value);
        assert!(value.get("password").is_none());
        assert_eq!(value["user_name"], "ada");
    }
}
