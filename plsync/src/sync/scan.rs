use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use super::item::{Item, MediaKind};
use super::reconcile::ItemSet;
use super::tags::read_descriptor;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("cannot list {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("scan task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait LibraryScanner: Send + Sync {
    /// Items recovered from the media files directly inside `dir`.
    async fn scan(&self, dir: &Path) -> Result<ItemSet, ScanError>;
}

/// Reads the tags of `.mp3` and `.mp4` files.
#[derive(Debug, Default, Clone, Copy)]
pub struct TagScanner;

#[async_trait]
impl LibraryScanner for TagScanner {
    async fn scan(&self, dir: &Path) -> Result<ItemSet, ScanError> {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || scan_dir(&dir)).await?
    }
}

fn scan_dir(dir: &Path) -> Result<ItemSet, ScanError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(ItemSet::new()),
        Err(source) => {
            return Err(ScanError::ReadDir {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ScanError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && MediaKind::from_path(&path).is_some() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut items = ItemSet::new();
    for path in paths {
        let descriptor = match read_descriptor(&path) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping unreadable tag");
                continue;
            }
        };
        let item = match Item::from_local(descriptor) {
            Ok(item) => item,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "skipping unidentified file");
                continue;
            }
        };
        if let Some(existing) = items.get(item.id()) {
            tracing::warn!(
                id = item.id(),
                path = %path.display(),
                kept = ?existing.local_path(),
                "duplicate id on disk, ignoring file"
            );
            continue;
        }
        items.insert(item.id().to_string(), item);
    }
    Ok(items)
}
