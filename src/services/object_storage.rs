//! Object-storage backends the pipeline forwards to.
//!
//! `S3ObjectStorage` talks to AWS S3 (or an S3-compatible endpoint) through
//! `aws-sdk-s3`. `LocalObjectStorage` keeps objects on local disk so the
//! service can run without cloud credentials.

use crate::models::upload::StorageTarget;
use async_trait::async_trait;
use aws_credential_types::provider::error::CredentialsError;
use aws_sdk_s3::{
    Client,
    error::DisplayErrorContext,
    presigning::PresigningConfig,
    primitives::ByteStream,
    types::ObjectCannedAcl,
};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut, stream};
use md5::Context;
use std::{
    error::Error as StdError,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

/// Region S3 reports for buckets created without a location constraint.
pub const DEFAULT_S3_REGION: &str = "us-east-1";
const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum ObjectStorageError {
    #[error("credentials unavailable: {0}")]
    Credentials(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ObjectStorageResult<T> = Result<T, ObjectStorageError>;

/// Body handed to a backend: either the buffered bytes or a scratch file.
#[derive(Debug, Clone)]
pub enum ObjectBody {
    Bytes(Bytes),
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    pub content_type: String,
    /// Base64 MD5 of the body, sent as `Content-MD5`.
    pub content_md5: String,
    /// Apply the `public-read` canned ACL.
    pub public_read: bool,
}

impl ObjectMetadata {
    pub fn for_body(content_type: impl Into<String>, body: &[u8], public_read: bool) -> Self {
        use base64::{Engine as _, engine::general_purpose};
        Self {
            content_type: content_type.into(),
            content_md5: general_purpose::STANDARD.encode(md5::compute(body).0),
            public_read,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StoredObject {
    pub etag: Option<String>,
}

/// The operations the upload pipeline needs from a storage backend.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `body` under `target`, overwriting any existing object.
    async fn put_object(
        &self,
        target: &StorageTarget,
        body: ObjectBody,
        metadata: &ObjectMetadata,
    ) -> ObjectStorageResult<StoredObject>;

    /// Region the bucket lives in.
    async fn resolve_region(&self, bucket: &str) -> ObjectStorageResult<String>;

    /// Time-limited GET URL for a private object.
    async fn presigned_url(
        &self,
        target: &StorageTarget,
        expires_in: Duration,
    ) -> ObjectStorageResult<String>;

    /// Unauthenticated URL for a public-read object.
    fn public_url(&self, target: &StorageTarget, region: &str) -> String {
        aws_public_url(&target.bucket, region, &target.key)
    }

    /// Short name used in logs and readiness output.
    fn backend_name(&self) -> &'static str;
}

/// `https://{bucket}.s3.{region}.amazonaws.com/{key}`
pub fn aws_public_url(bucket: &str, region: &str, key: &str) -> String {
    format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, key)
}

/// Map a `GetBucketLocation` constraint to a region name.
///
/// S3 answers with an empty constraint for us-east-1 and with the legacy
/// value `EU` for eu-west-1.
pub fn normalize_location_constraint(constraint: Option<&str>) -> String {
    match constraint.map(str::trim) {
        None | Some("") => DEFAULT_S3_REGION.to_string(),
        Some("EU") => "eu-west-1".to_string(),
        Some(region) => region.to_string(),
    }
}

/// Reject keys that could escape the bucket directory or confuse S3.
fn ensure_key_safe(key: &str) -> ObjectStorageResult<()> {
    let invalid = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.split('/').any(|segment| segment == "..")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
    if invalid {
        return Err(ObjectStorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// S3 backend built from the shared AWS SDK configuration.
#[derive(Clone)]
pub struct S3ObjectStorage {
    client: Client,
    has_credentials_provider: bool,
    endpoint_url: Option<String>,
}

impl S3ObjectStorage {
    /// Load region and the default credential chain (env, profile, instance
    /// role) and build a client.
    pub async fn from_env(region: &str, endpoint_url: Option<String>) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self::new(&sdk_config, endpoint_url)
    }

    pub fn new(sdk_config: &aws_config::SdkConfig, endpoint_url: Option<String>) -> Self {
        let mut builder = aws_sdk_s3::config::Builder::from(sdk_config);
        if let Some(endpoint) = endpoint_url.as_deref() {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let has_credentials_provider = sdk_config.credentials_provider().is_some();
        if !has_credentials_provider {
            tracing::warn!("no AWS credentials provider configured, uploads will fail");
        }
        Self {
            client: Client::from_conf(builder.build()),
            has_credentials_provider,
            endpoint_url,
        }
    }
}

/// Map an SDK failure, reporting credential resolution problems separately
/// from storage-side rejections.
fn classify_sdk_error(err: &(dyn StdError + 'static)) -> ObjectStorageError {
    let detail = DisplayErrorContext(err).to_string();
    let mut source = Some(err);
    while let Some(current) = source {
        if current.downcast_ref::<CredentialsError>().is_some() {
            return ObjectStorageError::Credentials(detail);
        }
        source = current.source();
    }
    ObjectStorageError::Request(detail)
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn put_object(
        &self,
        target: &StorageTarget,
        body: ObjectBody,
        metadata: &ObjectMetadata,
    ) -> ObjectStorageResult<StoredObject> {
        ensure_key_safe(&target.key)?;
        if !self.has_credentials_provider {
            return Err(ObjectStorageError::Credentials(
                "no credentials provider configured".into(),
            ));
        }

        let body = match body {
            ObjectBody::Bytes(bytes) => ByteStream::from(bytes),
            ObjectBody::File(path) => ByteStream::from_path(&path)
                .await
                .map_err(|err| ObjectStorageError::Request(err.to_string()))?,
        };

        let mut request = self
            .client
            .put_object()
            .bucket(&target.bucket)
            .key(&target.key)
            .content_type(&metadata.content_type)
            .content_md5(&metadata.content_md5)
            .body(body);
        if metadata.public_read {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }

        let output = request
            .send()
            .await
            .map_err(|err| classify_sdk_error(&err))?;

        Ok(StoredObject {
            etag: output.e_tag().map(|tag| tag.trim_matches('"').to_string()),
        })
    }

    async fn resolve_region(&self, bucket: &str) -> ObjectStorageResult<String> {
        let output = self
            .client
            .get_bucket_location()
            .bucket(bucket)
            .send()
            .await
            .map_err(|err| classify_sdk_error(&err))?;
        Ok(normalize_location_constraint(
            output.location_constraint().map(|c| c.as_str()),
        ))
    }

    async fn presigned_url(
        &self,
        target: &StorageTarget,
        expires_in: Duration,
    ) -> ObjectStorageResult<String> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|err| ObjectStorageError::Request(err.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&target.bucket)
            .key(&target.key)
            .presigned(presigning)
            .await
            .map_err(|err| classify_sdk_error(&err))?;
        Ok(request.uri().to_string())
    }

    fn public_url(&self, target: &StorageTarget, region: &str) -> String {
        match self.endpoint_url.as_deref() {
            // Path-style for S3-compatible providers: {endpoint}/{bucket}/{key}
            Some(endpoint) => format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                target.bucket,
                target.key
            ),
            None => aws_public_url(&target.bucket, region, &target.key),
        }
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

/// Disk backend storing payloads beneath `root/{bucket}/{shard}/{shard}/{key}`.
#[derive(Debug, Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Two-level shard from MD5(bucket/key) to keep directories small.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    pub fn object_path(&self, target: &StorageTarget) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(&target.bucket, &target.key);
        let mut path = self.root.clone();
        path.push(&target.bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(&target.key);
        path
    }

    /// Stream `body` into a temp file next to the destination, fsync it, then
    /// rename over the destination. Returns the MD5 ETag.
    async fn write_stream<S>(&self, file_path: &Path, body: S) -> ObjectStorageResult<String>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            ObjectStorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut digest = Context::new();
        pin_mut!(body);
        while let Some(chunk_res) = body.next().await {
            let written = match chunk_res {
                Ok(chunk) => {
                    digest.consume(&chunk);
                    file.write_all(&chunk).await
                }
                Err(err) => Err(err),
            };
            if let Err(err) = written {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ObjectStorageError::Io(err));
            }
        }
        let synced = match file.flush().await {
            Ok(()) => file.sync_all().await,
            Err(err) => Err(err),
        };
        if let Err(err) = synced {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStorageError::Io(err));
        }

        Ok(format!("{:x}", digest.compute()))
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn put_object(
        &self,
        target: &StorageTarget,
        body: ObjectBody,
        _metadata: &ObjectMetadata,
    ) -> ObjectStorageResult<StoredObject> {
        ensure_key_safe(&target.key)?;
        let file_path = self.object_path(target);

        let etag = match body {
            ObjectBody::Bytes(bytes) => {
                self.write_stream(&file_path, stream::once(async move { Ok::<_, io::Error>(bytes) }))
                    .await?
            }
            ObjectBody::File(path) => {
                let source = File::open(&path).await?;
                self.write_stream(&file_path, ReaderStream::new(source))
                    .await?
            }
        };

        debug!("stored {} at {}", target.key, file_path.display());
        Ok(StoredObject { etag: Some(etag) })
    }

    async fn resolve_region(&self, _bucket: &str) -> ObjectStorageResult<String> {
        Ok("local".to_string())
    }

    async fn presigned_url(
        &self,
        target: &StorageTarget,
        _expires_in: Duration,
    ) -> ObjectStorageResult<String> {
        Ok(self.public_url(target, "local"))
    }

    fn public_url(&self, target: &StorageTarget, _region: &str) -> String {
        let path = self.object_path(target);
        let absolute = std::path::absolute(&path).unwrap_or(path);
        format!("file://{}", absolute.display())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
