//! Recent-uploads log: an unbounded, append-only list of object URLs.
//!
//! Appends are individually atomic in both implementations (one `INSERT`, or
//! one push under a write lock); callers do no locking of their own.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Schema for the SQLite log, also used by `--migrate`.
pub const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum RecentUploadsError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[async_trait]
pub trait RecentUploadsLog: Send + Sync {
    async fn append(&self, url: &str) -> Result<(), RecentUploadsError>;

    /// Every URL in insertion order.
    async fn read_all(&self) -> Result<Vec<String>, RecentUploadsError>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), RecentUploadsError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str;
}

/// Run the embedded migration statements one by one.
pub async fn run_migrations(db: &SqlitePool) -> Result<(), RecentUploadsError> {
    let statements = MIGRATION_SQL
        .split(';')
        .map(str::trim)
        .filter(|stmt| {
            stmt.lines()
                .any(|line| !line.trim().is_empty() && !line.trim_start().starts_with("--"))
        })
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());
    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

/// Log persisted in the `recent_uploads` table.
#[derive(Clone)]
pub struct SqliteRecentUploads {
    db: Arc<SqlitePool>,
}

impl SqliteRecentUploads {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Create the table if it is missing, then wrap the pool.
    pub async fn open(db: Arc<SqlitePool>) -> Result<Self, RecentUploadsError> {
        run_migrations(&db).await?;
        Ok(Self::new(db))
    }
}

#[async_trait]
impl RecentUploadsLog for SqliteRecentUploads {
    async fn append(&self, url: &str) -> Result<(), RecentUploadsError> {
        sqlx::query("INSERT INTO recent_uploads (url, created_at) VALUES (?, ?)")
            .bind(url)
            .bind(Utc::now())
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<String>, RecentUploadsError> {
        let urls = sqlx::query_scalar::<_, String>("SELECT url FROM recent_uploads ORDER BY id ASC")
            .fetch_all(&*self.db)
            .await?;
        Ok(urls)
    }

    async fn ping(&self) -> Result<(), RecentUploadsError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM recent_uploads")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

/// Process-local log; contents are lost on restart.
#[derive(Default)]
pub struct MemoryRecentUploads {
    entries: RwLock<Vec<String>>,
}

impl MemoryRecentUploads {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecentUploadsLog for MemoryRecentUploads {
    async fn append(&self, url: &str) -> Result<(), RecentUploadsError> {
        self.entries.write().await.push(url.to_string());
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<String>, RecentUploadsError> {
        Ok(self.entries.read().await.clone())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
