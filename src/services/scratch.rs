//! Local scratch copies of uploads.
//!
//! A `ScratchFile` is removed by `remove()` on the normal path and by `Drop`
//! if the owning future is cancelled or panics before that.

use bytes::Bytes;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Directory that holds per-request scratch files.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create the directory if it does not exist yet.
    pub async fn ensure_exists(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    /// Write `data` to a new file named `{uuid}-{name}`.
    ///
    /// The random token keeps concurrent requests that share a filename apart;
    /// `create_new` guarantees we never write into someone else's file.
    pub async fn persist(&self, sanitized_name: &str, data: &Bytes) -> io::Result<ScratchFile> {
        let path = self
            .root
            .join(format!("{}-{}", Uuid::new_v4(), sanitized_name));
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        // From here on the guard owns the path.
        let guard = ScratchFile {
            path: Some(path),
        };
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(guard)
    }
}

/// A scratch file that is deleted when the request is done with it.
#[derive(Debug)]
pub struct ScratchFile {
    path: Option<PathBuf>,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Delete the file. A file that is already gone counts as removed.
    pub async fn remove(mut self) -> io::Result<()> {
        let Some(path) = self.path.take() else {
            return Ok(());
        };
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("removed scratch file {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                // Leave the path in place so Drop gets one more attempt.
                self.path = Some(path);
                Err(err)
            }
        }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != ErrorKind::NotFound {
                    warn!(
                        "failed to remove scratch file {}: {}",
                        path.display(),
                        err
                    );
                }
            }
        }
    }
}
