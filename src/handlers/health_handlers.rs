//! Health & readiness handlers.
//!
//! - GET /health, /healthz -> liveness
//! - GET /readyz           -> checks the recent-uploads log and scratch disk I/O

use crate::services::upload_service::UploadService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /health`
///
/// Always 200 and never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 1. Pings the recent-uploads log, if one is configured.
/// 2. Writes, reads back and deletes a probe file in the scratch directory,
///    if scratch persistence is enabled.
///
/// HTTP 200 when all checks pass, 503 otherwise. Unconfigured checks are
/// omitted from the body.
pub async fn readyz(State(service): State<UploadService>) -> impl IntoResponse {
    let mut checks = HashMap::new();

    if let Some(log) = service.recent_uploads() {
        let status = match log.ping().await {
            Ok(()) => CheckStatus::ok(),
            Err(e) => CheckStatus::failed(format!("{} log error: {}", log.backend_name(), e)),
        };
        checks.insert("recent_uploads", status);
    }

    if let Some(scratch) = service.config().scratch.as_ref() {
        let tmp_path = scratch.path().join(format!(".readyz-{}", Uuid::new_v4()));
        let status = match fs::write(&tmp_path, b"readyz").await {
            Ok(_) => {
                let read = fs::read(&tmp_path).await;
                let removed = fs::remove_file(&tmp_path).await;
                match (read, removed) {
                    (Ok(bytes), Ok(_)) if bytes == b"readyz" => CheckStatus::ok(),
                    (Ok(bytes), Err(e)) if bytes == b"readyz" => {
                        CheckStatus::failed(format!("could not remove tmp file: {}", e))
                    }
                    (Ok(_), _) => CheckStatus::failed("file content mismatch".to_string()),
                    (Err(e), _) => CheckStatus::failed(format!("could not read tmp file: {}", e)),
                }
            }
            Err(e) => CheckStatus::failed(format!("could not write tmp file: {}", e)),
        };
        checks.insert("scratch", status);
    }

    let overall_ok = checks.values().all(|check| check.ok);
    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        storage_backend: service.storage().backend_name(),
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    storage_backend: &'static str,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
