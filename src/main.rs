use anyhow::{Context, Result};
use axum::Router;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use upload_relay::{
    config::{AppConfig, RecentUploadsKind, StorageBackendKind},
    routes::routes,
    services::{
        object_storage::{LocalObjectStorage, ObjectStorage, S3ObjectStorage},
        recent_uploads::{self, MemoryRecentUploads, RecentUploadsLog, SqliteRecentUploads},
        upload_service::UploadService,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting upload-relay with config: {:?}", cfg);

    // --- Initialize SQLite connection (only when something needs it) ---
    let db = if migrate || cfg.recent_uploads == RecentUploadsKind::Sqlite {
        Some(connect_sqlite(&cfg.database_url).await?)
    } else {
        None
    };

    // --- Handle migration mode ---
    if migrate {
        if let Some(db) = &db {
            recent_uploads::run_migrations(db).await?;
            db.close().await;
        }
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Collaborators ---
    let storage: Arc<dyn ObjectStorage> = match cfg.storage_backend {
        StorageBackendKind::S3 => {
            Arc::new(S3ObjectStorage::from_env(&cfg.region, cfg.s3_endpoint.clone()).await)
        }
        StorageBackendKind::Local => {
            ensure_dir(Path::new(&cfg.local_storage_dir))?;
            Arc::new(LocalObjectStorage::new(&cfg.local_storage_dir))
        }
    };

    let recent: Option<Arc<dyn RecentUploadsLog>> = match cfg.recent_uploads {
        RecentUploadsKind::Off => None,
        RecentUploadsKind::Memory => Some(Arc::new(MemoryRecentUploads::new())),
        RecentUploadsKind::Sqlite => match &db {
            Some(db) => Some(Arc::new(
                SqliteRecentUploads::open(db.clone())
                    .await
                    .context("preparing recent_uploads table")?,
            ) as Arc<dyn RecentUploadsLog>),
            None => None,
        },
    };

    let upload_config = cfg.upload_service_config();
    if let Some(scratch) = &upload_config.scratch {
        scratch
            .ensure_exists()
            .await
            .with_context(|| format!("creating scratch dir {}", scratch.path().display()))?;
        tracing::info!("Using scratch directory {}", scratch.path().display());
    }

    // --- Initialize core service ---
    let service = UploadService::new(storage, recent, upload_config);

    // --- Build router ---
    let app: Router = routes::app(service, &cfg.cors_origins);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!(
        bucket = %cfg.bucket,
        backend = ?cfg.storage_backend,
        recent_uploads = ?cfg.recent_uploads,
        "Server listening on http://{}",
        listener.local_addr()?
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Teardown ---
    if let Some(db) = db {
        db.close().await;
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Open the SQLite pool, creating the database file's directory if needed.
async fn connect_sqlite(db_url: &str) -> Result<Arc<SqlitePool>> {
    tracing::debug!("Connecting using raw URL => {}", db_url);

    // Extract the local file path SQLx will use
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !db_path.starts_with(":memory:") {
            ensure_dir(parent)?;
        }
    }

    let options = db_url
        .parse::<sqlx::sqlite::SqliteConnectOptions>()
        .with_context(|| format!("parsing database url `{}`", db_url))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {}", db_url))?;
    Ok(Arc::new(pool))
}

fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("creating directory {}", path.display()))?;
        tracing::info!("Created missing directory {}", path.display());
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        _ = terminate => tracing::info!("Received terminate signal"),
    }

    tracing::info!("Shutting down gracefully...");
}
