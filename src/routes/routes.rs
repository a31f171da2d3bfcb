//! Defines routes for the upload service.
//!
//! ## Structure
//! - `POST /upload`: multipart upload, field `file`
//! - `GET  /recent-uploads`: URLs from the recent-uploads log
//! - `GET  /health`, `/healthz`: liveness
//! - `GET  /readyz`: readiness

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{recent_uploads, upload_file},
    },
    services::upload_service::UploadService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Room for multipart boundaries, part headers and small extra fields on top
/// of the file itself.
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Build the router for all upload routes.
///
/// The router carries shared state (`UploadService`) to all handlers.
pub fn routes() -> Router<UploadService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/health", get(healthz))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/upload", post(upload_file))
        .route("/recent-uploads", get(recent_uploads))
}

/// The complete application: routes, body limit, CORS and request tracing.
pub fn app(service: UploadService, cors_origins: &[String]) -> Router {
    let body_limit = match service.config().policy.max_upload_bytes {
        Some(max) => DefaultBodyLimit::max(
            usize::try_from(max.saturating_add(MULTIPART_OVERHEAD_BYTES)).unwrap_or(usize::MAX),
        ),
        None => DefaultBodyLimit::disable(),
    };

    routes()
        .layer(body_limit)
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    if origins.iter().any(|origin| origin == "*") {
        tracing::warn!("CORS configured to allow all origins");
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("ignoring invalid CORS origin `{}`", origin);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(Any)
}
