//! HTTP-level tests for the upload routes.
//!
//! Objects go to `LocalObjectStorage` in a temp dir, so no cloud access is
//! needed.

use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::{
    TestServer,
    multipart::{MultipartForm, Part},
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use upload_relay::{
    models::upload::StorageTarget,
    routes::routes,
    services::{
        keys::KeyPolicy,
        object_storage::{
            LocalObjectStorage, ObjectBody, ObjectMetadata, ObjectStorage, ObjectStorageError,
            ObjectStorageResult, StoredObject,
        },
        recent_uploads::{MemoryRecentUploads, RecentUploadsError, RecentUploadsLog},
        scratch::ScratchDir,
        upload_service::{UploadService, UploadServiceConfig},
    },
};

/// Backend whose credential chain is empty.
struct NoCredentials;

#[async_trait]
impl ObjectStorage for NoCredentials {
    async fn put_object(
        &self,
        _target: &StorageTarget,
        _body: ObjectBody,
        _metadata: &ObjectMetadata,
    ) -> ObjectStorageResult<StoredObject> {
        Err(ObjectStorageError::Credentials(
            "no providers in chain provided credentials".into(),
        ))
    }

    async fn resolve_region(&self, _bucket: &str) -> ObjectStorageResult<String> {
        Ok("us-east-1".into())
    }

    async fn presigned_url(
        &self,
        _target: &StorageTarget,
        _expires_in: Duration,
    ) -> ObjectStorageResult<String> {
        Err(ObjectStorageError::Credentials("unreachable in these tests".into()))
    }

    fn backend_name(&self) -> &'static str {
        "no-credentials"
    }
}

/// Backend that stores fine but cannot tell which region the bucket lives in.
struct RegionUnavailable(LocalObjectStorage);

#[async_trait]
impl ObjectStorage for RegionUnavailable {
    async fn put_object(
        &self,
        target: &StorageTarget,
        body: ObjectBody,
        metadata: &ObjectMetadata,
    ) -> ObjectStorageResult<StoredObject> {
        self.0.put_object(target, body, metadata).await
    }

    async fn resolve_region(&self, _bucket: &str) -> ObjectStorageResult<String> {
        Err(ObjectStorageError::Request("AccessDenied: GetBucketLocation".into()))
    }

    async fn presigned_url(
        &self,
        target: &StorageTarget,
        expires_in: Duration,
    ) -> ObjectStorageResult<String> {
        self.0.presigned_url(target, expires_in).await
    }

    fn backend_name(&self) -> &'static str {
        "region-unavailable"
    }
}

/// Log whose appends always fail.
struct ClosedLog;

#[async_trait]
impl RecentUploadsLog for ClosedLog {
    async fn append(&self, _url: &str) -> Result<(), RecentUploadsError> {
        Err(RecentUploadsError::Sqlx(sqlx::Error::PoolClosed))
    }

    async fn read_all(&self) -> Result<Vec<String>, RecentUploadsError> {
        Ok(Vec::new())
    }

    fn backend_name(&self) -> &'static str {
        "closed"
    }
}

struct TestApp {
    server: TestServer,
    log: Arc<MemoryRecentUploads>,
    _dir: TempDir,
}

fn setup(
    storage: Option<Arc<dyn ObjectStorage>>,
    configure: impl FnOnce(&mut UploadServiceConfig, &TempDir),
) -> TestApp {
    let dir = tempfile::tempdir().expect("temp dir");
    let storage = storage.unwrap_or_else(|| {
        Arc::new(LocalObjectStorage::new(dir.path().join("objects"))) as Arc<dyn ObjectStorage>
    });
    let log = Arc::new(MemoryRecentUploads::new());

    let mut config = UploadServiceConfig::new("mytest-bucket");
    configure(&mut config, &dir);
    let service = UploadService::new(storage, Some(log.clone()), config);

    let app = routes::app(service, &["*".to_string()]);
    let server = TestServer::new(app).expect("Failed to create test server");
    TestApp {
        server,
        log,
        _dir: dir,
    }
}

fn file_form(name: &str, data: Vec<u8>) -> MultipartForm {
    let part = Part::bytes(data).file_name(name).mime_type("image/png");
    MultipartForm::new().add_part("file", part)
}

#[tokio::test]
async fn upload_png_succeeds_with_unique_key_and_url() {
    let app = setup(None, |_, _| {});

    let response = app
        .server
        .post("/upload")
        .multipart(file_form("photo.png", vec![1u8; 1024]))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["message"], "File uploaded successfully");
    assert_eq!(body["filename"], "photo.png");
    assert_eq!(body["bucket"], "mytest-bucket");
    assert_eq!(body["size_bytes"], 1024);

    let key = body["key"].as_str().unwrap();
    assert!(key.starts_with("uploads/"), "{key}");
    assert!(key.ends_with("_photo.png"), "{key}");

    let url = body["url"].as_str().unwrap();
    assert!(!url.is_empty());
    assert_eq!(body["s3_path"], body["url"]);
    assert!(body.get("warnings").is_none());

    assert_eq!(app.log.read_all().await.unwrap(), vec![url.to_string()]);
}

#[tokio::test]
async fn recent_uploads_lists_urls_in_order() {
    let app = setup(None, |_, _| {});

    let mut urls = Vec::new();
    for name in ["a.png", "b.gif"] {
        let body: Value = app
            .server
            .post("/upload")
            .multipart(file_form(name, b"data".to_vec()))
            .await
            .json();
        urls.push(body["url"].as_str().unwrap().to_string());
    }

    let response = app.server.get("/recent-uploads").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["uploads"], serde_json::json!(urls));
}

#[tokio::test]
async fn disallowed_extension_is_rejected() {
    let app = setup(None, |_, _| {});

    let response = app
        .server
        .post("/upload")
        .multipart(file_form("malware.exe", b"MZ".to_vec()))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "File type not allowed");
    assert!(app.log.read_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn form_without_file_part_is_rejected() {
    let app = setup(None, |_, _| {});

    let form = MultipartForm::new().add_text("description", "no file here");
    let response = app.server.post("/upload").multipart(form).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "No file part");

    // A plain text field called `file` is not a file part either.
    let form = MultipartForm::new().add_text("file", "");
    let response = app.server.post("/upload").multipart(form).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "No file part");
}

#[tokio::test]
async fn empty_filename_is_rejected() {
    let app = setup(None, |_, _| {});

    let part = Part::bytes(b"data".to_vec()).file_name("").mime_type("image/png");
    let form = MultipartForm::new().add_part("file", part);
    let response = app.server.post("/upload").multipart(form).await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "No file selected");
    assert!(app.log.read_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn region_lookup_failure_still_succeeds_with_warning() {
    let objects = tempfile::tempdir().unwrap();
    let storage = Arc::new(RegionUnavailable(LocalObjectStorage::new(objects.path())));
    let app = setup(Some(storage), |config, _| {
        config.public_read = true;
    });

    let response = app
        .server
        .post("/upload")
        .multipart(file_form("photo.png", vec![1u8; 64]))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["message"], "File uploaded successfully");
    assert_eq!(body["url"], "");
    assert_eq!(body["s3_path"], "");
    assert_eq!(
        body["warnings"],
        serde_json::json!(["Object URL could not be resolved"])
    );
    assert!(!body.to_string().contains("AccessDenied"));
    assert!(app.log.read_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_log_append_is_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    let service = UploadService::new(
        Arc::new(LocalObjectStorage::new(dir.path())),
        Some(Arc::new(ClosedLog)),
        UploadServiceConfig::new("mytest-bucket"),
    );
    let server = TestServer::new(routes::app(service, &[])).unwrap();

    let response = server
        .post("/upload")
        .multipart(file_form("photo.png", vec![1u8; 64]))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert!(!body["url"].as_str().unwrap().is_empty());
    assert_eq!(body["s3_path"], body["url"]);
    assert_eq!(
        body["warnings"],
        serde_json::json!(["Upload was not added to recent uploads"])
    );
}

#[tokio::test]
async fn oversized_file_is_rejected() {
    let app = setup(None, |config, _| {
        config.policy.max_upload_bytes = Some(1024);
    });

    let response = app
        .server
        .post("/upload")
        .multipart(file_form("big.png", vec![0u8; 4096]))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "File size exceeds limit");
}

#[tokio::test]
async fn credentials_failure_returns_500_and_records_nothing() {
    let app = setup(Some(Arc::new(NoCredentials)), |_, _| {});

    let response = app
        .server
        .post("/upload")
        .multipart(file_form("photo.png", vec![1u8; 16]))
        .await;

    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    let message = body["error"].as_str().unwrap().to_lowercase();
    assert!(message.contains("credentials"), "{message}");
    assert!(!message.contains("providers in chain"));
    assert!(app.log.read_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn scratch_copy_is_cleaned_up() {
    let app = setup(None, |config, dir| {
        let scratch = dir.path().join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();
        config.scratch = Some(ScratchDir::new(scratch));
    });

    let response = app
        .server
        .post("/upload")
        .multipart(file_form("photo.png", vec![9u8; 512]))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let scratch = app._dir.path().join("scratch");
    assert_eq!(std::fs::read_dir(scratch).unwrap().count(), 0);
}

#[tokio::test]
async fn raw_policy_overwrites_same_key() {
    let app = setup(None, |config, _| {
        config.key_policy = KeyPolicy::Raw;
    });

    let mut keys = Vec::new();
    for payload in [b"first".to_vec(), b"second".to_vec()] {
        let response = app
            .server
            .post("/upload")
            .multipart(file_form("photo.png", payload))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        keys.push(response.json::<Value>()["key"].as_str().unwrap().to_string());
    }
    assert_eq!(keys, vec!["photo.png", "photo.png"]);

    let storage = LocalObjectStorage::new(app._dir.path().join("objects"));
    let stored = storage.object_path(&StorageTarget {
        bucket: "mytest-bucket".into(),
        key: "photo.png".into(),
    });
    assert_eq!(std::fs::read(stored).unwrap(), b"second");
}

#[tokio::test]
async fn health_and_readiness() {
    let app = setup(None, |config, dir| {
        config.scratch = Some(ScratchDir::new(dir.path()));
    });

    let response = app.server.get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["status"], "healthy");

    let response = app.server.get("/readyz").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage_backend"], "local");
    assert_eq!(body["checks"]["scratch"]["ok"], true);
    assert_eq!(body["checks"]["recent_uploads"]["ok"], true);
}

#[tokio::test]
async fn recent_uploads_disabled_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let service = UploadService::new(
        Arc::new(LocalObjectStorage::new(dir.path())),
        None,
        UploadServiceConfig::new("mytest-bucket"),
    );
    let server = TestServer::new(routes::app(service, &[])).unwrap();

    let response = server.get("/recent-uploads").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}
