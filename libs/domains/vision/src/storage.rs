//! Temporary on-disk storage for uploaded images.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

/// Flat directory holding one file per pending image.
#[derive(Debug, Clone)]
pub struct TempStorage {
    dir: PathBuf,
}

impl TempStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if absent.
    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir).await
    }

    /// `{task_id}_{image_id}_{sanitized filename}` inside the storage directory.
    pub fn path_for(&self, task_id: Uuid, image_id: Uuid, filename: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{}_{}", task_id, image_id, sanitize_filename(filename)))
    }

    /// Write `bytes` for one image and return its path.
    pub async fn persist(
        &self,
        task_id: Uuid,
        image_id: Uuid,
        filename: &str,
        bytes: &[u8],
    ) -> std::io::Result<PathBuf> {
        self.ensure_dir().await?;
        let path = self.path_for(task_id, image_id, filename);
        fs::write(&path, bytes).await?;
        debug!(path = %path.display(), size = bytes.len(), "Saved temporary file");
        Ok(path)
    }

    pub async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        fs::read(path).await
    }

    /// Delete one file. Missing files are fine; returns whether a file was removed.
    pub async fn remove(&self, path: &Path) -> bool {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Cleaned up temporary file");
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
                false
            }
        }
    }

    /// Delete every file in the directory. Returns how many were removed.
    pub async fn purge(&self) -> std::io::Result<usize> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() && self.remove(&entry.path()).await {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Readiness probe: the directory exists (or can be created) and is writable.
    pub async fn probe(&self) -> std::io::Result<()> {
        self.ensure_dir().await?;
        let marker = self.dir.join(format!(".probe-{}", Uuid::new_v4()));
        fs::write(&marker, b"").await?;
        fs::remove_file(&marker).await
    }
}

/// Neutralize path separators and NULs so a client filename stays one path segment.
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "upload".to_string(),
        _ => cleaned,
    }
}
