use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

const DEFAULT_DOWNLOADER: &str = "yt-dlp";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("playlist listing timed out after {0:?}")]
    Timeout(Duration),
    #[error("downloader produced no listing ({status}): {stderr}")]
    EmptyResponse { status: ExitStatus, stderr: String },
    #[error("listing is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("listing has no entries")]
    MissingEntries,
}

/// Runs the downloader in flat-playlist mode and decodes its JSON dump.
#[derive(Debug, Clone)]
pub struct PlaylistClient {
    program: PathBuf,
    timeout: Duration,
}

impl PlaylistClient {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub async fn fetch_playlist(&self, reference: &str) -> Result<PlaylistListing, SourceError> {
        let mut command = Command::new(&self.program);
        command
            .args(["--flat-playlist", "-q", "-J", "--no-warnings"])
            .arg(reference)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| SourceError::Timeout(self.timeout))?
            .map_err(|source| SourceError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        // An empty dump means the listing failed, not that the playlist is empty.
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(SourceError::EmptyResponse {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let mut listing = PlaylistListing::parse(&output.stdout)?;
        listing.complete = output.status.success();
        Ok(listing)
    }
}

impl Default for PlaylistClient {
    fn default() -> Self {
        Self::new(DEFAULT_DOWNLOADER)
    }
}

#[derive(Debug, Clone)]
pub struct PlaylistListing {
    pub title: Option<String>,
    /// Raw entries in playlist order; decode with [`PlaylistListing::entries`].
    pub entries: Vec<serde_json::Value>,
    /// False when the downloader exited non-zero but still printed a listing.
    pub complete: bool,
}

#[derive(Debug, Deserialize)]
struct ListingResponse {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    entries: Option<Vec<serde_json::Value>>,
}

impl PlaylistListing {
    pub fn parse(raw: &[u8]) -> Result<Self, SourceError> {
        let response: ListingResponse = serde_json::from_slice(raw)?;
        let entries = response.entries.ok_or(SourceError::MissingEntries)?;
        Ok(Self {
            title: response.title,
            entries,
            complete: true,
        })
    }

    /// Decodes each entry on its own, paired with its position in the listing.
    /// `null` placeholders are skipped but still consume a position.
    pub fn entries(
        &self,
    ) -> impl Iterator<Item = (usize, Result<RemoteEntry, serde_json::Error>)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, value)| !value.is_null())
            .map(|(position, value)| (position, RemoteEntry::deserialize(value)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub thumbnails: Option<Vec<Thumbnail>>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Thumbnail {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub height: Option<u64>,
}

impl RemoteEntry {
    pub fn artist(&self) -> Option<&str> {
        self.channel.as_deref().or(self.uploader.as_deref())
    }

    /// Tallest thumbnail wins; the first one listed wins a tie.
    pub fn best_thumbnail(&self) -> Option<&str> {
        let mut best: Option<(&str, u64)> = None;
        for thumb in self.thumbnails.iter().flatten() {
            let Some(url) = thumb.url.as_deref().filter(|url| !url.is_empty()) else {
                continue;
            };
            let height = thumb.height.unwrap_or(0);
            if best.is_none_or(|(_, best_height)| height > best_height) {
                best = Some((url, height));
            }
        }
        best.map(|(url, _)| url)
            .or_else(|| self.thumbnail.as_deref().filter(|url| !url.is_empty()))
    }
}
