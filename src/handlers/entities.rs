//! Generic CRUD handlers shared by every entity kind.
//!
//! Routes carry their [`EntityKind`] (and, for relation listings, the
//! [`RelationRoute`]) as a request extension, so one set of handlers serves
//! all collections.
//!
//! User writes go through the credential verifier, which keeps `user_name`
//! unique and hashes a plaintext `password`. Responses never carry the hash.

use std::collections::HashMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde_json::{Value, json};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::auth::{Identity, redact_password};
use crate::error::{AppError, AppResult};
use crate::models::{EnrolledQuery, EntityKind, Envelope};
use crate::state::AppState;
use crate::store::{Filter, Record};

/// Header carrying the number of records in a list response.
pub const TOTAL_COUNT_HEADER: &str = "x-total-count";

/// Relation listing bound to a route such as `/lessons/course/{id}`.
#[derive(Debug, Clone, Copy)]
pub struct RelationRoute {
    pub kind: EntityKind,
    pub field: &'static str,
}

type ListResponse = ([(&'static str, String); 1], Json<Envelope<Vec<Value>>>);

fn parse_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::Invalid(format!("invalid id: {raw}")))
}

fn into_record(value: Value) -> AppResult<Record> {
    match value {
        Value::Object(record) => Ok(record),
        _ => Err(AppError::Invalid(
            "request body must be a JSON object".to_string(),
        )),
    }
}

fn present(kind: EntityKind, mut value: Value) -> Value {
    if kind == EntityKind::Users {
        redact_password(&mut value);
    }
    value
}

fn list_response(kind: EntityKind, records: Vec<Value>) -> ListResponse {
    let data: Vec<Value> = records.into_iter().map(|v| present(kind, v)).collect();
    (
        [(TOTAL_COUNT_HEADER, data.len().to_string())],
        Json(Envelope::success(data)),
    )
}

/// Build the list filter from query parameters.
///
/// Only the kind's filterable fields are honoured; anything else in the
/// query string is ignored.
fn query_filter(kind: EntityKind, params: &HashMap<String, String>) -> AppResult<Filter> {
    let mut filter = Filter::new();
    // Sorted for a stable condition order
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort_unstable();

    for key in keys {
        if !kind.filterable_fields().contains(&key.as_str()) {
            debug!(entity = %kind, param = %key, "Ignoring unsupported query parameter");
            continue;
        }
        if let Some(value) = params.get(key) {
            filter = filter.and_eq(key, value.as_str())?;
        }
    }
    Ok(filter)
}

/// `GET /{entity}`
#[instrument(skip(state, params))]
pub async fn list_records(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<ListResponse> {
    let filter = query_filter(kind, &params)?;
    let records = state.repository.read_filtered(kind, &filter).await?;
    Ok(list_response(kind, records))
}

/// `GET /{entity}/{relation}/{id}`
#[instrument(skip(state))]
pub async fn list_related(
    State(state): State<AppState>,
    Extension(route): Extension<RelationRoute>,
    Path(id): Path<String>,
) -> AppResult<ListResponse> {
    let id = parse_id(&id)?;
    let filter = Filter::eq(route.field, id.to_string())?;
    let records = state.repository.read_filtered(route.kind, &filter).await?;
    Ok(list_response(route.kind, records))
}

/// `GET /submissions/latest/{student_id}/{assignment_id}`
#[instrument(skip(state))]
pub async fn latest_submission(
    State(state): State<AppState>,
    Path((student_id, assignment_id)): Path<(String, String)>,
) -> AppResult<Json<Envelope<Value>>> {
    let filter = Filter::eq("student_id", parse_id(&student_id)?.to_string())?
        .and_eq("assignment_id", parse_id(&assignment_id)?.to_string())?;

    // Listings are newest first
    let latest = state
        .repository
        .read_filtered(EntityKind::Submissions, &filter)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound("No submission found".to_string()))?;

    Ok(Json(Envelope::success(latest)))
}

/// `GET /courses/enrolled[?student_id=]`
///
/// Courses joined through the student's enrollments, most recent enrollment
/// first. Enrollments pointing at a deleted course are skipped.
#[instrument(skip(state, identity))]
pub async fn enrolled_courses(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<EnrolledQuery>,
) -> AppResult<ListResponse> {
    let student_id = match query.student_id.as_deref() {
        Some(raw) => parse_id(raw)?,
        None => identity.subject_id,
    };

    let enrollments = state
        .repository
        .read_filtered(
            EntityKind::Enrollments,
            &Filter::eq("student_id", student_id.to_string())?,
        )
        .await?;

    let mut course_ids: Vec<Uuid> = Vec::with_capacity(enrollments.len());
    for enrollment in &enrollments {
        let Some(id) = enrollment
            .get("course_id")
            .and_then(Value::as_str)
            .and_then(|id| Uuid::parse_str(id).ok())
        else {
            debug!(%student_id, "Skipping enrollment without a valid course_id");
            continue;
        };
        if !course_ids.contains(&id) {
            course_ids.push(id);
        }
    }

    let mut courses = Vec::with_capacity(course_ids.len());
    for id in course_ids {
        match state.repository.read_by_id(EntityKind::Courses, id).await {
            Ok(course) => courses.push(course),
            Err(AppError::NotFound(_)) => {
                debug!(%student_id, course_id = %id, "Skipping enrollment of a missing course");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(list_response(EntityKind::Courses, courses))
}

/// `GET /{entity}/{id}`
#[instrument(skip(state))]
pub async fn get_record(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Path(id): Path<String>,
) -> AppResult<Json<Envelope<Value>>> {
    let id = parse_id(&id)?;
    let record = state.repository.read_by_id(kind, id).await?;
    Ok(Json(Envelope::success(present(kind, record))))
}

/// `POST /{entity}`
#[instrument(skip(state, payload))]
pub async fn create_record(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    payload: Result<Json<Value>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Envelope<Value>>)> {
    let Json(body) = payload?;
    let mut record = into_record(body)?;

    if kind == EntityKind::Users {
        state.verifier.prepare_user_record(&mut record, None).await?;
    }

    let created = state.repository.create(kind, record).await?;
    Ok((
        StatusCode::CREATED,
        Json(Envelope::success(present(kind, created))),
    ))
}

/// `PUT /{entity}/{id}`
#[instrument(skip(state, payload))]
pub async fn update_record(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> AppResult<Json<Envelope<Value>>> {
    let id = parse_id(&id)?;
    let Json(body) = payload?;
    let mut patch = into_record(body)?;

    if kind == EntityKind::Users {
        state
            .verifier
            .prepare_user_record(&mut patch, Some(id))
            .await?;
    }

    let updated = state.repository.update(kind, id, patch).await?;
    Ok(Json(Envelope::success(present(kind, updated))))
}

/// `DELETE /{entity}/{id}`
#[instrument(skip(state))]
pub async fn delete_record(
    State(state): State<AppState>,
    Extension(kind): Extension<EntityKind>,
    Path(id): Path<String>,
) -> AppResult<Json<Envelope<Value>>> {
    let id = parse_id(&id)?;
    state.repository.delete(kind, id).await?;
    Ok(Json(Envelope::success(json!({ "id": id }))))
}
