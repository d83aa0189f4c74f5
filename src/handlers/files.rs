//! File upload and presigned download links.
//!
//! # Endpoints
//!
//! - `POST /upload` - multipart upload, field `file`
//! - `GET /file?objectName=` - presigned GET URL for a stored object
//!
//! Uploads are routed by file extension into a folder with a fixed content
//! type; the stored key is `{folder}/{uuid}.{ext}`. No other file-type
//! handling happens here.

use axum::Json;
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{FileQuery, FileUrlResponse, UploadResponse};
use crate::state::AppState;

/// Multipart field holding the upload.
pub const UPLOAD_FIELD: &str = "file";

/// Where an upload goes and how it is served back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadTarget {
    pub folder: &'static str,
    pub content_type: &'static str,
}

const fn target(folder: &'static str, content_type: &'static str) -> UploadTarget {
    UploadTarget {
        folder,
        content_type,
    }
}

/// Route a file extension (case-insensitive, without the dot).
pub fn upload_target(extension: &str) -> Option<UploadTarget> {
    let target = match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => target("images", "image/jpeg"),
        "png" => target("images", "image/png"),
        "mp4" => target("videos", "video/mp4"),
        "pdf" => target("documents", "application/pdf"),
        "doc" => target("documents", "application/msword"),
        "docx" => target(
            "documents",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ),
        "xls" => target("spreadsheets", "application/vnd.ms-excel"),
        "xlsx" => target(
            "spreadsheets",
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ),
        _ => return None,
    };
    Some(target)
}

fn extension_of(file_name: &str) -> Option<&str> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

fn multipart_error(e: MultipartError) -> AppError {
    AppError::Invalid(e.body_text())
}

/// `POST /upload`
#[instrument(skip_all)]
pub async fn upload_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    let mut multipart = multipart.map_err(|e| AppError::Invalid(e.body_text()))?;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::Invalid("uploaded file has no name".to_string()))?;
        let extension = extension_of(&file_name)
            .ok_or_else(|| AppError::Invalid(format!("file {file_name} has no extension")))?
            .to_ascii_lowercase();
        let target = upload_target(&extension)
            .ok_or_else(|| AppError::Invalid(format!("unsupported file type: .{extension}")))?;

        let body = field.bytes().await.map_err(multipart_error)?;
        let file_id = Uuid::new_v4();
        let key = format!("{}/{file_id}.{extension}", target.folder);

        let stored = state
            .objects
            .put(&key, target.content_type, body)
            .await?;

        info!(
            bucket = state.objects.bucket(),
            key = %stored.key,
            size = stored.size,
            content_type = target.content_type,
            "File uploaded"
        );

        return Ok((
            StatusCode::CREATED,
            Json(UploadResponse {
                message: "File uploaded successfully".to_string(),
                file_name,
                file_path: stored.key,
                file_size: stored.size,
                file_type: target.content_type.to_string(),
                file_id: file_id.to_string(),
            }),
        ));
    }

    Err(AppError::Invalid(format!(
        "multipart field `{UPLOAD_FIELD}` is required"
    )))
}

/// `GET /file?objectName=`
#[instrument(skip(state))]
pub async fn file_url(
    State(state): State<AppState>,
    Query(query): Query<FileQuery>,
) -> AppResult<Json<FileUrlResponse>> {
    let object_name = query
        .object_name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::Invalid("objectName is required".to_string()))?;

    state.objects.stat(&object_name).await?;
    let url = state
        .objects
        .presigned_get(&object_name, state.config.presign_ttl)
        .await?;
    debug!(bucket = state.objects.bucket(), object_name = %object_name, "Presigned URL issued");

    Ok(Json(FileUrlResponse {
        message: "File URL generated successfully".to_string(),
        object_name,
        url,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_routing_by_extension() {
        assert_eq!(upload_target("png").unwrap().folder, "images");
        assert_eq!(upload_target("JPG").unwrap().content_type, "image/jpeg");
        assert_eq!(upload_target("mp4").unwrap().folder, "videos");
        assert_eq!(upload_target("docx").unwrap().folder, "documents");
        assert_eq!(upload_target("xls").unwrap().folder, "spreadsheets");
        assert!(upload_target("exe").is_none());
        assert!(upload_target("").is_none());
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("report.final.pdf"), Some("pdf"));
        assert_eq!(extension_of("README"), None);
        assert_eq!(extension_of("trailing."), None);
    }
}
