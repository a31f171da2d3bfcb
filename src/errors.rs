//! Error types for the upload pipeline and their HTTP representation.
//!
//! Client-caused failures (`RejectReason`) map to 400. Infrastructure
//! failures (`BackendError`) map to 500 with a generic message; the detail
//! stays in the logs.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Why an upload was refused before any side effect took place.
///
/// The `Display` text is the message returned to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("No file part")]
    MissingFile,
    #[error("No file selected")]
    EmptyFilename,
    #[error("File type not allowed")]
    DisallowedExtension,
    #[error("File size exceeds limit")]
    SizeExceeded,
    #[error("Invalid filename")]
    InvalidFilename,
}

/// Server-side failures. Some are fatal for a request, others
/// (`RegionLookup`, `UrlSigning`, `Cache`) only ever surface as warnings on an
/// upload that already succeeded.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("storage credentials could not be resolved: {0}")]
    Credentials(String),
    #[error("storage backend rejected the upload: {0}")]
    Storage(String),
    #[error("storage backend did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("bucket region lookup failed: {0}")]
    RegionLookup(String),
    #[error("object URL signing failed: {0}")]
    UrlSigning(String),
    #[error("recent uploads append failed: {0}")]
    Cache(String),
    #[error("scratch file error: {0}")]
    Scratch(#[from] io::Error),
}

impl BackendError {
    /// Message safe to show to a client.
    pub fn client_message(&self) -> &'static str {
        match self {
            BackendError::Credentials(_) => "Could not find storage credentials",
            BackendError::Storage(_) => "Failed to upload to S3",
            BackendError::Timeout(_) => "Upload timed out",
            BackendError::RegionLookup(_) | BackendError::UrlSigning(_) => {
                "Object URL could not be resolved"
            }
            BackendError::Cache(_) => "Upload was not added to recent uploads",
            BackendError::Scratch(_) => "Server configuration error",
        }
    }
}

/// Terminal outcome of a failed `submit`.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Rejected(#[from] RejectReason),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::Rejected(_) => StatusCode::BAD_REQUEST,
            UploadError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn client_message(&self) -> String {
        match self {
            UploadError::Rejected(reason) => reason.to_string(),
            UploadError::Backend(err) => err.client_message().to_string(),
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        AppError::new(self.status(), self.client_message()).into_response()
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}
