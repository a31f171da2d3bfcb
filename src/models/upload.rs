//! Values that flow through a single upload request.

use crate::errors::BackendError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// The inbound file as received from the client.
///
/// `filename` is client-supplied and untrusted until it has been through
/// `sanitize_filename`.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub content_type: Option<String>,
    pub payload: UploadPayload,
}

impl UploadRequest {
    pub fn new(filename: impl Into<String>, content_type: Option<String>, data: Bytes) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            payload: UploadPayload::complete(data),
        }
    }
}

/// A fully buffered file body.
///
/// The payload is held as `Bytes` so the size check and the forward can both
/// read it without consuming anything. `len` is the number of bytes the client
/// sent; it is larger than `data.len()` only when buffering stopped early
/// because the size ceiling had already been exceeded.
#[derive(Debug, Clone)]
pub struct UploadPayload {
    data: Bytes,
    len: u64,
}

impl UploadPayload {
    pub fn complete(data: Bytes) -> Self {
        let len = data.len() as u64;
        Self { data, len }
    }

    /// A payload whose reading was abandoned after `observed_len` bytes.
    pub fn truncated(data: Bytes, observed_len: u64) -> Self {
        Self {
            len: observed_len.max(data.len() as u64),
            data,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_complete(&self) -> bool {
        self.len == self.data.len() as u64
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }
}

/// Where an object lands in the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageTarget {
    pub bucket: String,
    pub key: String,
}

/// Result of a successful forward.
#[derive(Debug, Clone, Serialize)]
pub struct UploadRecord {
    pub bucket: String,
    pub key: String,
    /// Sanitized base name the key was built from.
    pub filename: String,
    /// `None` when the URL could not be resolved; the upload itself still succeeded.
    pub url: Option<String>,
    pub content_type: String,
    pub size_bytes: u64,
    pub etag: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// A stored upload plus any soft failures that happened after the store.
#[derive(Debug)]
pub struct UploadOutcome {
    pub record: UploadRecord,
    pub warnings: Vec<BackendError>,
}

/// JSON body returned by `POST /upload`.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: &'static str,
    pub filename: String,
    pub key: String,
    pub bucket: String,
    pub url: String,
    /// Same value as `url`; kept for older front-end clients.
    pub s3_path: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<&'static str>,
}

impl From<UploadOutcome> for UploadResponse {
    fn from(outcome: UploadOutcome) -> Self {
        let UploadOutcome { record, warnings } = outcome;
        let url = record.url.unwrap_or_default();
        Self {
            message: "File uploaded successfully",
            filename: record.filename,
            key: record.key,
            bucket: record.bucket,
            s3_path: url.clone(),
            url,
            content_type: record.content_type,
            size_bytes: record.size_bytes,
            uploaded_at: record.uploaded_at,
            warnings: warnings.iter().map(BackendError::client_message).collect(),
        }
    }
}

/// JSON body returned by `GET /recent-uploads`.
#[derive(Debug, Serialize)]
pub struct RecentUploadsResponse {
    pub uploads: Vec<String>,
}
