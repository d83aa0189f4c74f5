//! Object storage for uploaded files.
//!
//! Downloads are handed out as presigned URLs. A URL carries its expiry and
//! an HMAC-SHA256 signature over method, bucket, key and expiry; the storage
//! endpoint behind `public_url` holds the same key and checks it.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::Serialize;
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
}

/// Object-store collaborator.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, content_type: &str, body: Bytes) -> AppResult<ObjectInfo>;

    /// Metadata for `key`; `NotFound` when absent.
    async fn stat(&self, key: &str) -> AppResult<ObjectInfo>;

    /// Time-limited GET URL for `key`.
    async fn presigned_get(&self, key: &str, ttl: Duration) -> AppResult<String>;

    /// Bucket all keys live in.
    fn bucket(&self) -> &str;
}

#[derive(Debug)]
struct StoredObject {
    info: ObjectInfo,
    #[cfg_attr(not(test), allow(dead_code))]
    body: Bytes,
}

/// Process-local object store with signed download URLs.
pub struct InMemoryObjectStore {
    bucket: String,
    public_url: String,
    signing_key: Vec<u8>,
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("bucket", &self.bucket)
            .field("public_url", &self.public_url)
            .finish_non_exhaustive()
    }
}

impl InMemoryObjectStore {
    /// Create a store. Without a signing key a random one is generated, so
    /// URLs do not survive a restart.
    pub fn new(
        bucket: impl Into<String>,
        public_url: impl Into<String>,
        signing_key: Option<&[u8]>,
    ) -> Self {
        let signing_key = match signing_key {
            Some(key) => key.to_vec(),
            None => {
                let mut key = [0u8; 32];
                rand::rng().fill(&mut key);
                key.to_vec()
            }
        };

        Self {
            bucket: bucket.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
            signing_key,
            objects: RwLock::new(HashMap::new()),
        }
    }

    fn sign(&self, key: &str, expires: i64) -> AppResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| AppError::Internal(format!("invalid signing key: {e}")))?;
        mac.update(format!("GET\n{}/{}\n{}", self.bucket, key, expires).as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, content_type: &str, body: Bytes) -> AppResult<ObjectInfo> {
        let info = ObjectInfo {
            key: key.to_string(),
            size: body.len() as u64,
            content_type: content_type.to_string(),
            last_modified: Utc::now(),
        };

        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                info: info.clone(),
                body,
            },
        );

        debug!(bucket = %self.bucket, key, size = info.size, "Object stored");
        Ok(info)
    }

    async fn stat(&self, key: &str) -> AppResult<ObjectInfo> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.info.clone())
            .ok_or_else(|| AppError::NotFound(format!("object {key} not found")))
    }

    async fn presigned_get(&self, key: &str, ttl: Duration) -> AppResult<String> {
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires = Utc::now().timestamp().saturating_add(ttl);
        let signature = URL_SAFE_NO_PAD.encode(self.sign(key, expires)?);

        Ok(format!(
            "{}/{}/{}?expires={}&signature={}",
            self.public_url, self.bucket, key, expires, signature
        ))
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
