//! HMAC-signed identity tokens.
//!
//! Tokens are compact JWTs. The codec issues HS256 and accepts any member of
//! the HMAC family on verification. Anything else is refused before the
//! signature is looked at.
//!
//! # Verification order
//!
//! 1. Header must parse and name a known algorithm (`Malformed`)
//! 2. Algorithm must be HS256/HS384/HS512 (`SignatureMismatch`)
//! 3. Claims must decode (`Malformed`)
//! 4. `exp` must lie in the future (`Expired`), checked before the signature
//! 5. Signature must match the server secret (`SignatureMismatch`)

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::Role;
use crate::config::Secret;
use crate::error::{AppError, AppResult};

const HMAC_FAMILY: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Claims carried by an identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (account id)
    pub sub: Uuid,
    /// Display name
    pub name: String,
    pub role: Role,
    /// Expiry as seconds since the Unix epoch
    pub exp: i64,
    /// Issued-at as seconds since the Unix epoch
    pub iat: i64,
}

/// Why a token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    SignatureMismatch,
    #[error("token has expired")]
    Expired,
}

/// Encodes and verifies identity tokens with a single symmetric secret.
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("secret", &"[redacted]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl TokenCodec {
    pub fn new(secret: &Secret, ttl: Duration) -> Self {
        let bytes = secret.expose().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            ttl,
        }
    }

    /// Token lifetime in seconds.
    pub fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs()
    }

    /// Build claims for a subject expiring one TTL from now.
    pub fn claims_for(&self, subject: Uuid, name: impl Into<String>, role: Role) -> Claims {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        Claims {
            sub: subject,
            name: name.into(),
            role,
            exp: now.saturating_add(ttl),
            iat: now,
        }
    }

    /// Sign claims into a compact HS256 token.
    pub fn issue(&self, claims: &Claims) -> AppResult<String> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("failed to sign token: {e}")))
    }

    /// Verify a compact token and return its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| TokenError::Malformed)?;
        if !HMAC_FAMILY.contains(&header.alg) {
            return Err(TokenError::SignatureMismatch);
        }

        let unverified = Self::peek_claims(token, header.alg)?;
        if unverified.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }

        let mut validation = Validation::new(header.alg);
        validation.algorithms = HMAC_FAMILY.to_vec();
        validation.leeway = 0;
        validation.set_required_spec_claims(&["sub", "exp"]);

        jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                JwtErrorKind::ExpiredSignature => TokenError::Expired,
                JwtErrorKind::InvalidSignature | JwtErrorKind::InvalidAlgorithm => {
                    TokenError::SignatureMismatch
                }
                _ => TokenError::Malformed,
            })
    }

    /// Decode claims without checking the signature.
    fn peek_claims(token: &str, alg: Algorithm) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(alg);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .map_err(|_| TokenError::Malformed)
    }
}
