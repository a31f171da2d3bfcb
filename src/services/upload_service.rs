//! UploadService: validates an inbound file and forwards it to object storage.
//!
//! Order of operations for `submit`:
//! 1. presence, extension, size and filename checks (no side effects)
//! 2. key construction
//! 3. optional scratch copy
//! 4. a single `put_object` call, bounded by `forward_timeout`
//! 5. URL derivation and recent-uploads append, both non-fatal
//!
//! There are no retries. The scratch copy, if any, is gone when `submit`
//! returns.

use crate::{
    errors::{BackendError, UploadError},
    models::upload::{StorageTarget, UploadOutcome, UploadRecord, UploadRequest},
    services::{
        keys::KeyPolicy,
        object_storage::{ObjectBody, ObjectMetadata, ObjectStorage, ObjectStorageError},
        recent_uploads::RecentUploadsLog,
        scratch::ScratchDir,
        validation::{self, UploadPolicy},
    },
};
use chrono::Utc;
use std::{sync::Arc, time::Duration, time::Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(3600);

/// Where the region for public URLs comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionSource {
    /// Ask the backend for the bucket location after each upload.
    Lookup,
    Static(String),
}

#[derive(Debug, Clone)]
pub struct UploadServiceConfig {
    pub bucket: String,
    pub policy: UploadPolicy,
    pub key_policy: KeyPolicy,
    /// `None` forwards straight from memory.
    pub scratch: Option<ScratchDir>,
    /// Objects get the `public-read` ACL and a plain URL; otherwise they stay
    /// private and the URL is presigned.
    pub public_read: bool,
    pub region_source: RegionSource,
    pub presign_expiry: Duration,
    pub forward_timeout: Duration,
}

impl UploadServiceConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            policy: UploadPolicy::default(),
            key_policy: KeyPolicy::default(),
            scratch: None,
            public_read: false,
            region_source: RegionSource::Lookup,
            presign_expiry: DEFAULT_PRESIGN_EXPIRY,
            forward_timeout: DEFAULT_FORWARD_TIMEOUT,
        }
    }
}

/// Cheap to clone; shared as router state.
#[derive(Clone)]
pub struct UploadService {
    storage: Arc<dyn ObjectStorage>,
    recent: Option<Arc<dyn RecentUploadsLog>>,
    config: Arc<UploadServiceConfig>,
}

impl UploadService {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        recent: Option<Arc<dyn RecentUploadsLog>>,
        config: UploadServiceConfig,
    ) -> Self {
        Self {
            storage,
            recent,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &UploadServiceConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.storage
    }

    pub fn recent_uploads(&self) -> Option<&Arc<dyn RecentUploadsLog>> {
        self.recent.as_ref()
    }

    /// Run the full pipeline for one request. `None` means the request carried
    /// no file part.
    pub async fn submit(&self, request: Option<UploadRequest>) -> Result<UploadOutcome, UploadError> {
        let cfg = &*self.config;

        let request = validation::check_presence(request.as_ref())?;
        let extension =
            validation::check_extension(&request.filename, &cfg.policy.allowed_extensions)?;
        validation::check_size(&request.payload, cfg.policy.max_upload_bytes)?;
        let filename = validation::sanitize_filename(&request.filename, &extension)?;

        let target = StorageTarget {
            bucket: cfg.bucket.clone(),
            key: cfg.key_policy.build_key(&filename),
        };
        let data = request.payload.bytes().clone();
        let size_bytes = data.len() as u64;
        let content_type =
            validation::resolve_content_type(request.content_type.as_deref(), &extension);
        let metadata = ObjectMetadata::for_body(&content_type, &data, cfg.public_read);

        let scratch = match &cfg.scratch {
            Some(dir) => Some(dir.persist(&filename, &data).await.map_err(|err| {
                error!(
                    error = %err,
                    scratch_dir = %dir.path().display(),
                    "failed to write scratch file"
                );
                BackendError::Scratch(err)
            })?),
            None => None,
        };
        let body = match &scratch {
            Some(file) => ObjectBody::File(file.path().to_path_buf()),
            None => ObjectBody::Bytes(data),
        };

        let start = Instant::now();
        let forwarded = tokio::time::timeout(
            cfg.forward_timeout,
            self.storage.put_object(&target, body, &metadata),
        )
        .await;

        if let Some(file) = scratch {
            if let Err(err) = file.remove().await {
                warn!(error = %err, key = %target.key, "failed to remove scratch file");
            }
        }

        let stored = match forwarded {
            Ok(Ok(stored)) => stored,
            Ok(Err(err)) => {
                error!(
                    error = %err,
                    backend = self.storage.backend_name(),
                    bucket = %target.bucket,
                    key = %target.key,
                    size_bytes,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "upload failed"
                );
                return Err(match err {
                    ObjectStorageError::Credentials(detail) => BackendError::Credentials(detail),
                    other => BackendError::Storage(other.to_string()),
                }
                .into());
            }
            Err(_elapsed) => {
                error!(
                    backend = self.storage.backend_name(),
                    bucket = %target.bucket,
                    key = %target.key,
                    size_bytes,
                    timeout_ms = cfg.forward_timeout.as_millis() as u64,
                    "upload timed out"
                );
                return Err(BackendError::Timeout(cfg.forward_timeout).into());
            }
        };

        info!(
            backend = self.storage.backend_name(),
            bucket = %target.bucket,
            key = %target.key,
            size_bytes,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "upload successful"
        );

        let mut warnings = Vec::new();
        let url = match self.derive_url(&target).await {
            Ok(url) => Some(url),
            Err(err) => {
                warn!(error = %err, key = %target.key, "object stored but URL unresolved");
                warnings.push(err);
                None
            }
        };

        if let (Some(log), Some(url)) = (&self.recent, url.as_deref()) {
            if let Err(err) = log.append(url).await {
                warn!(
                    error = %err,
                    log = log.backend_name(),
                    key = %target.key,
                    "failed to append to recent uploads"
                );
                warnings.push(BackendError::Cache(err.to_string()));
            }
        }

        Ok(UploadOutcome {
            record: UploadRecord {
                bucket: target.bucket,
                key: target.key,
                filename,
                url,
                content_type,
                size_bytes,
                etag: stored.etag,
                uploaded_at: Utc::now(),
            },
            warnings,
        })
    }

    async fn derive_url(&self, target: &StorageTarget) -> Result<String, BackendError> {
        let cfg = &*self.config;
        if !cfg.public_read {
            return self
                .storage
                .presigned_url(target, cfg.presign_expiry)
                .await
                .map_err(|err| BackendError::UrlSigning(err.to_string()));
        }

        let region = match &cfg.region_source {
            RegionSource::Static(region) => region.clone(),
            RegionSource::Lookup => self
                .storage
                .resolve_region(&target.bucket)
                .await
                .map_err(|err| BackendError::RegionLookup(err.to_string()))?,
        };
        debug!(bucket = %target.bucket, region = %region, "resolved bucket region");
        Ok(self.storage.public_url(target, &region))
    }
}
