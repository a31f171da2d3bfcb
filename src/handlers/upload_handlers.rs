//! HTTP handlers for uploads and the recent-uploads listing.

use crate::{
    errors::AppError,
    models::upload::{RecentUploadsResponse, UploadPayload, UploadRequest, UploadResponse},
    services::upload_service::UploadService,
};
use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::BytesMut;

/// Multipart field that carries the file.
pub const FILE_FIELD: &str = "file";

/// `POST /upload`: multipart form with a `file` part.
pub async fn upload_file(State(service): State<UploadService>, multipart: Multipart) -> Response {
    let limit = service.config().policy.max_upload_bytes;
    let request = match read_file_part(multipart, limit).await {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };

    match service.submit(request).await {
        Ok(outcome) => (StatusCode::OK, Json(UploadResponse::from(outcome))).into_response(),
        Err(err) => err.into_response(),
    }
}

/// `GET /recent-uploads`: every URL in the log, oldest first.
pub async fn recent_uploads(
    State(service): State<UploadService>,
) -> Result<Json<RecentUploadsResponse>, AppError> {
    let log = service
        .recent_uploads()
        .ok_or_else(|| AppError::not_found("Recent uploads are not enabled"))?;

    let uploads = log.read_all().await.map_err(|err| {
        tracing::error!(error = %err, log = log.backend_name(), "failed to read recent uploads");
        AppError::internal("Failed to read recent uploads")
    })?;

    Ok(Json(RecentUploadsResponse { uploads }))
}

/// Pull the `file` part out of the form and buffer it.
///
/// Parts named `file` without a filename attribute are ordinary form fields
/// and are skipped. When `limit` is set, buffering stops as soon as the part
/// is known to be larger; the payload then reports the bytes seen so far so
/// the size check can reject it.
async fn read_file_part(
    mut multipart: Multipart,
    limit: Option<u64>,
) -> Result<Option<UploadRequest>, AppError> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);

        let mut buf = BytesMut::new();
        let mut seen: u64 = 0;
        let mut complete = true;
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            seen += chunk.len() as u64;
            if limit.is_some_and(|max| seen > max) {
                complete = false;
                break;
            }
            buf.extend_from_slice(&chunk);
        }

        let data = buf.freeze();
        let payload = if complete {
            UploadPayload::complete(data)
        } else {
            UploadPayload::truncated(data, seen)
        };
        return Ok(Some(UploadRequest {
            filename,
            content_type,
            payload,
        }));
    }
    Ok(None)
}

fn multipart_error(err: MultipartError) -> AppError {
    tracing::debug!(error = %err, "malformed multipart request");
    AppError::new(err.status(), err.body_text())
}
