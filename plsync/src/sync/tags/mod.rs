//! Tag layer: recovers item descriptors from media files and writes dirty
//! fields back. Audio files carry ID3v2.3, video files an MP4 `ilst`.

mod mp4;
mod mpeg;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use plsync_core::ThumbnailClient;
use thiserror::Error;

use super::item::{Field, Item, LocalDescriptor, MediaKind};
use super::thumbnail::square_thumbnail;

pub const ID_KEY: &str = "youtube_id";
pub const THUMBNAIL_KEY: &str = "thumbnail_url";

#[derive(Debug, Error)]
pub enum TagError {
    #[error("ID3 tag I/O failed for {path}: {source}")]
    Id3 {
        path: PathBuf,
        #[source]
        source: id3::Error,
    },
    #[error("MP4 tag I/O failed for {path}: {source}")]
    Mp4 {
        path: PathBuf,
        #[source]
        source: lofty::error::LoftyError,
    },
    #[error("item {0} has no local file")]
    NotMaterialized(String),
    #[error("tag task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The file's extension names no container we can tag.
    Skipped,
}

#[async_trait]
pub trait TagWriter: Send + Sync {
    /// Persists the item's dirty fields. Flags are left for the caller.
    async fn write(&self, item: &Item) -> Result<WriteOutcome, TagError>;
}

/// Reads the descriptor of one media file. Files without a tag yield a
/// descriptor without an id.
pub fn read_descriptor(path: &Path) -> Result<LocalDescriptor, TagError> {
    match MediaKind::from_path(path) {
        Some(MediaKind::Video) => mp4::read(path).map_err(|source| TagError::Mp4 {
            path: path.to_path_buf(),
            source,
        }),
        Some(MediaKind::Audio) | None => mpeg::read(path).map_err(|source| TagError::Id3 {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Empty text frames read back as absent, matching what `Item` stores.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

/// Frames to rewrite; `None` leaves the frame alone.
#[derive(Debug, Default)]
struct TagPatch {
    id: Option<String>,
    album: Option<Option<String>>,
    title: Option<Option<String>>,
    artist: Option<Option<String>>,
    album_artist: Option<Option<String>>,
    track: Option<u32>,
    artwork: Option<Artwork>,
}

#[derive(Debug)]
struct Artwork {
    url: String,
    png: Vec<u8>,
}

impl TagPatch {
    fn for_item(item: &Item) -> Self {
        let first_save = item.is_fresh();
        let dirty = |field: Field| first_save || item.changes().contains(field);
        let mut patch = TagPatch::default();

        if first_save {
            patch.id = Some(item.id().to_string());
            patch.album = Some(item.album().map(str::to_owned));
        }
        if dirty(Field::Title) {
            patch.title = Some(item.title().map(str::to_owned));
        }
        if dirty(Field::Channel) {
            patch.artist = Some(item.channel().map(str::to_owned));
        }
        if dirty(Field::AlbumArtist) {
            patch.album_artist = Some(item.album_artist().map(str::to_owned));
        }
        if dirty(Field::Index) {
            patch.track = item
                .index()
                .map(|index| u32::try_from(index + 1).unwrap_or(u32::MAX));
        }
        patch
    }
}

/// Values are stored exactly as given; only an empty value drops the frame.
fn text_to_store(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

pub struct FileTagWriter {
    thumbnails: ThumbnailClient,
}

impl FileTagWriter {
    pub fn new(thumbnails: ThumbnailClient) -> Self {
        Self { thumbnails }
    }

    /// Fetches and squares the artwork. Failures are logged and leave the
    /// thumbnail frames untouched so the next run retries.
    async fn artwork_for(&self, item: &Item) -> Option<Artwork> {
        let url = item.thumbnail()?;
        let raw = match self.thumbnails.fetch(url).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(id = item.id(), url, error = %err, "thumbnail fetch failed");
                return None;
            }
        };
        match tokio::task::spawn_blocking(move || square_thumbnail(&raw)).await {
            Ok(Ok(png)) => Some(Artwork {
                url: url.to_string(),
                png,
            }),
            Ok(Err(err)) => {
                tracing::warn!(id = item.id(), url, error = %err, "thumbnail is not a usable image");
                None
            }
            Err(err) => {
                tracing::warn!(id = item.id(), error = %err, "thumbnail task failed");
                None
            }
        }
    }
}

#[async_trait]
impl TagWriter for FileTagWriter {
    async fn write(&self, item: &Item) -> Result<WriteOutcome, TagError> {
        let path = item
            .local_path()
            .ok_or_else(|| TagError::NotMaterialized(item.id().to_string()))?
            .to_path_buf();
        let Some(kind) = MediaKind::from_path(&path) else {
            tracing::debug!(id = item.id(), path = %path.display(), "no known tag container, skipping");
            return Ok(WriteOutcome::Skipped);
        };

        let mut patch = TagPatch::for_item(item);
        if item.is_fresh() || item.changes().contains(Field::Thumbnail) {
            patch.artwork = self.artwork_for(item).await;
        }

        let target = path.clone();
        match kind {
            MediaKind::Audio => tokio::task::spawn_blocking(move || mpeg::apply(&target, patch))
                .await?
                .map_err(|source| TagError::Id3 { path, source })?,
            MediaKind::Video => tokio::task::spawn_blocking(move || mp4::apply(&target, patch))
                .await?
                .map_err(|source| TagError::Mp4 { path, source })?,
        }
        Ok(WriteOutcome::Written)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::item::CollectionInfo;
    use crate::sync::item::test_support::{local_item, remote_entry, remote_item};
    use tempfile::tempdir;

    /// A fresh item as the engine hands it over right after materializing.
    pub(super) fn materialized(
        id: &str,
        title: &str,
        channel: &str,
        thumbnail_base: &str,
        path: &Path,
    ) -> Item {
        let mut entry = remote_entry(id, title, channel);
        entry.thumbnails = Some(vec![plsync_core::Thumbnail {
            url: Some(format!("{thumbnail_base}/{id}.jpg")),
            height: Some(90),
        }]);
        let info = CollectionInfo {
            name: Some("Road Trip".to_string()),
            artist: Some(channel.to_string()),
            media_kind: MediaKind::from_path(path).unwrap_or_default(),
        };
        let mut item = Item::from_remote(&entry, 2, &info).unwrap();
        item.mark_materialized(path.to_path_buf());
        item
    }

    /// Rescans the file and merges the same remote state, as a second run does.
    pub(super) fn second_pass(path: &Path, remote: &Item) -> Item {
        let mut item = Item::from_local(read_descriptor(path).unwrap()).unwrap();
        item.update(remote);
        item
    }

    #[tokio::test]
    async fn unknown_extension_is_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Clip.webm");
        std::fs::write(&path, b"").unwrap();
        let mut item = remote_item("x1", "Clip", "Band", 0);
        item.mark_materialized(path.clone());

        let writer = FileTagWriter::new(ThumbnailClient::new().unwrap());
        assert_eq!(writer.write(&item).await.unwrap(), WriteOutcome::Skipped);
        assert_eq!(std::fs::read(&path).unwrap(), b"");
    }

    #[tokio::test]
    async fn unmaterialized_item_is_an_error() {
        let writer = FileTagWriter::new(ThumbnailClient::new().unwrap());
        let err = writer
            .write(&remote_item("x1", "Song", "Band", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, TagError::NotMaterialized(id) if id == "x1"));
    }

    #[test]
    fn patch_for_clean_local_item_is_empty() {
        let patch = TagPatch::for_item(&local_item("x1", "Song", "Band", 0));
        assert!(patch.id.is_none());
        assert!(patch.title.is_none());
        assert!(patch.artist.is_none());
        assert!(patch.album_artist.is_none());
        assert!(patch.track.is_none());
    }

    #[test]
    fn empty_text_drops_the_frame() {
        assert_eq!(text_to_store(Some("")), None);
        assert_eq!(text_to_store(Some("Song ")), Some("Song "));
        assert_eq!(text_to_store(None), None);
    }
}
