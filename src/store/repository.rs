//! Record persistence.
//!
//! [`Repository`] is the seam the handlers talk to. Records are JSON objects
//! keyed by a UUID `id`; the repository owns `id`, `created_at` and
//! `updated_at`. [`InMemoryRepository`] backs development runs and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::filter::Filter;
use crate::error::{AppError, AppResult};
use crate::models::EntityKind;

/// Fields the repository manages; callers cannot overwrite them.
const MANAGED_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

/// A JSON record body.
pub type Record = Map<String, Value>;

/// Persistence collaborator.
///
/// Failures of the backing store surface as [`AppError::Upstream`].
#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert a record and return it with managed fields stamped.
    async fn create(&self, kind: EntityKind, record: Record) -> AppResult<Value>;

    async fn read_by_id(&self, kind: EntityKind, id: Uuid) -> AppResult<Value>;

    /// Records matching `filter`, newest first.
    async fn read_filtered(&self, kind: EntityKind, filter: &Filter) -> AppResult<Vec<Value>>;

    /// Merge `patch` into an existing record.
    async fn update(&self, kind: EntityKind, id: Uuid, patch: Record) -> AppResult<Value>;

    async fn delete(&self, kind: EntityKind, id: Uuid) -> AppResult<()>;

    /// Cheap liveness check used by readiness.
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct StoredRecord {
    seq: u64,
    value: Value,
}

/// Process-local repository.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    collections: RwLock<HashMap<EntityKind, HashMap<Uuid, StoredRecord>>>,
    next_seq: AtomicU64,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(kind: EntityKind, id: Uuid) -> AppError {
    AppError::NotFound(format!("{kind} record {id} not found"))
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create(&self, kind: EntityKind, mut record: Record) -> AppResult<Value> {
        let id = Uuid::new_v4();
        let now = Value::String(Utc::now().to_rfc3339());

        for field in MANAGED_FIELDS {
            record.remove(field);
        }
        record.insert("id".to_string(), Value::String(id.to_string()));
        record.insert("created_at".to_string(), now.clone());
        record.insert("updated_at".to_string(), now);

        let value = Value::Object(record);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        self.collections
            .write()
            .await
            .entry(kind)
            .or_default()
            .insert(
                id,
                StoredRecord {
                    seq,
                    value: value.clone(),
                },
            );

        debug!(entity = %kind, %id, "Record created");
        Ok(value)
    }

    async fn read_by_id(&self, kind: EntityKind, id: Uuid) -> AppResult<Value> {
        self.collections
            .read()
            .await
            .get(&kind)
            .and_then(|c| c.get(&id))
            .map(|r| r.value.clone())
            .ok_or_else(|| not_found(kind, id))
    }

    async fn read_filtered(&self, kind: EntityKind, filter: &Filter) -> AppResult<Vec<Value>> {
        let guard = self.collections.read().await;
        let Some(collection) = guard.get(&kind) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<&StoredRecord> = collection
            .values()
            .filter(|r| filter.matches(&r.value))
            .collect();
        matched.sort_by(|a, b| b.seq.cmp(&a.seq));

        Ok(matched.into_iter().map(|r| r.value.clone()).collect())
    }

    async fn update(&self, kind: EntityKind, id: Uuid, patch: Record) -> AppResult<Value> {
        let mut guard = self.collections.write().await;
        let stored = guard
            .get_mut(&kind)
            .and_then(|c| c.get_mut(&id))
            .ok_or_else(|| not_found(kind, id))?;

        let Value::Object(fields) = &mut stored.value else {
            return Err(AppError::Internal(format!(
                "{kind} record {id} is not an object"
            )));
        };

        for (key, value) in patch {
            if !MANAGED_FIELDS.contains(&key.as_str()) {
                fields.insert(key, value);
            }
        }
        fields.insert(
            "updated_at".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );

        debug!(entity = %kind, %id, "Record updated");
        Ok(stored.value.clone())
    }

    async fn delete(&self, kind: EntityKind, id: Uuid) -> AppResult<()> {
        self.collections
            .write()
            .await
            .get_mut(&kind)
            .and_then(|c| c.remove(&id))
            .map(|_| debug!(entity = %kind, %id, "Record deleted"))
            .ok_or_else(|| not_found(kind, id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_create_stamps_managed_fields() {
        let repo = InMemoryRepository::new();
        let created = repo
            .create(
                EntityKind::Courses,
                record(json!({"id": "spoofed", "title": "Rust"})),
            )
            .await
            .unwrap();

        let id = created["id"].as_str().unwrap();
        assert_ne!(id, "spoofed");
        assert!(Uuid::parse_str(id).is_ok());
        assert!(created["created_at"].is_string());
        assert_eq!(created["title"], "Rust");
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let repo = InMemoryRepository::new();
        let err = repo
            .read_by_id(EntityKind::Lessons, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_filtered() {
        let repo = InMemoryRepository::new();
        for (title, course) in [("a", "c1"), ("b", "c2"), ("c", "c1")] {
            repo.create(
                EntityKind::Lessons,
                record(json!({"title": title, "course_id": course})),
            )
            .await
            .unwrap();
        }

        let filter = Filter::eq("course_id", "c1").unwrap();
        let titles: Vec<_> = repo
            .read_filtered(EntityKind::Lessons, &filter)
            .await
            .unwrap()
            .into_iter()
            .map(|v| v["title"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(titles, vec!["c", "a"]);

        let empty = repo
            .read_filtered(EntityKind::Grades, &Filter::new())
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_update_merges_and_protects_id() {
        let repo = InMemoryRepository::new();
        let created = repo
            .create(EntityKind::Courses, record(json!({"title": "Old", "level": 1})))
            .await
            .unwrap();
        let id = Uuid::parse_str(created["id"].as_str().unwrap()).unwrap();

        let updated = repo
            .update(
                EntityKind::Courses,
                id,
                record(json!({"title": "New", "id": "other"})),
            )
            .await
            .unwrap();

        assert_eq!(updated["title"], "New");
        assert_eq!(updated["level"], 1);
        assert_eq!(updated["id"], created["id"]);
    }

    #[tokio::test]
    async fn test_delete_then_read_fails() {
        let repo = InMemoryRepository::new();
        let created = repo
            .create(EntityKind::Comments, record(json!({"body": "hi"})))
            .await
            .unwrap();
        let id = Uuid::parse_str(created["id"].as_str().unwrap()).unwrap();

        repo.delete(EntityKind::Comments, id).await.unwrap();
        assert!(repo.read_by_id(EntityKind::Comments, id).await.is_err());
        assert!(repo.delete(EntityKind::Comments, id).await.is_err());
    }
}
