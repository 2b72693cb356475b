use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use plsync_core::{PlaylistClient, ThumbnailClient};

use crate::config::{Collection, load_collections};
use crate::sync::engine::{EngineError, SyncEngine, SyncReport};
use crate::sync::materialize::{DownloaderMaterializer, MaterializeConfig};
use crate::sync::scan::TagScanner;
use crate::sync::tags::FileTagWriter;

const DEFAULT_CONFIG_PATH: &str = "/config.yaml";
const DEFAULT_DOWNLOADER: &str = "yt-dlp";
const DEFAULT_NORMALIZER: &str = "mp3gain";
const DEFAULT_WATCH_URL: &str = "https://www.youtube.com/watch?v=";
const DEFAULT_LOCK_STALE_SECS: u64 = 6 * 60 * 60;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 30 * 60;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 5 * 60;
const DEFAULT_CONCURRENCY: u64 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfig {
    pub config_path: PathBuf,
    pub downloader: PathBuf,
    pub normalizer: Option<PathBuf>,
    pub staging_dir: PathBuf,
    pub lock_path: PathBuf,
    pub lock_stale_after: Duration,
    pub download_timeout: Duration,
    pub fetch_timeout: Duration,
    pub concurrency: usize,
    pub watch_url: String,
}

impl RunConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = dirs::home_dir();
        let path = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .map(|value| match &home {
                    Some(home) => expand_with_home(&value, home),
                    None => PathBuf::from(value),
                })
        };
        let secs = |name: &str, default: u64| {
            Duration::from_secs(read_u64(lookup(name), default))
        };

        // An explicitly empty normalizer turns normalization off.
        let normalizer = match lookup("PLSYNC_NORMALIZER") {
            Some(value) if value.trim().is_empty() => None,
            Some(_) => path("PLSYNC_NORMALIZER"),
            None => Some(PathBuf::from(DEFAULT_NORMALIZER)),
        };

        Self {
            config_path: path("PLSYNC_CONFIG").unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            downloader: path("PLSYNC_DOWNLOADER").unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOADER)),
            normalizer,
            staging_dir: path("PLSYNC_STAGING_DIR").unwrap_or_else(default_staging_dir),
            lock_path: path("PLSYNC_LOCK_PATH").unwrap_or_else(default_lock_path),
            lock_stale_after: secs("PLSYNC_LOCK_STALE_SECS", DEFAULT_LOCK_STALE_SECS),
            download_timeout: secs("PLSYNC_DOWNLOAD_TIMEOUT_SECS", DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            fetch_timeout: secs("PLSYNC_FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS),
            concurrency: read_u64(lookup("PLSYNC_DOWNLOAD_CONCURRENCY"), DEFAULT_CONCURRENCY)
                as usize,
            watch_url: lookup("PLSYNC_WATCH_URL")
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_WATCH_URL.to_string()),
        }
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_staging_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("plsync")
        .join("staging")
}

fn default_lock_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("plsync.lock")
}

fn read_u64(value: Option<String>, default: u64) -> u64 {
    value
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[derive(Debug)]
pub struct CollectionOutcome {
    pub reference: String,
    pub result: Result<SyncReport, EngineError>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub collections: Vec<CollectionOutcome>,
}

impl RunSummary {
    pub fn synced(&self) -> usize {
        self.collections
            .iter()
            .filter(|outcome| outcome.result.is_ok())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.collections.len() - self.synced()
    }

    pub fn item_failures(&self) -> usize {
        self.collections
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().ok())
            .map(|report| report.failures.len())
            .sum()
    }
}

pub struct SyncRuntime {
    collections: Vec<Collection>,
    engine: SyncEngine,
}

impl SyncRuntime {
    pub async fn bootstrap(config: &RunConfig) -> anyhow::Result<Self> {
        let collections = load_collections(&config.config_path)
            .await
            .with_context(|| format!("failed to load playlists from {:?}", config.config_path))?;
        tokio::fs::create_dir_all(&config.staging_dir)
            .await
            .with_context(|| format!("failed to create staging dir at {:?}", config.staging_dir))?;

        let source = PlaylistClient::new(&config.downloader).with_timeout(config.fetch_timeout);
        let thumbnails = ThumbnailClient::new().context("failed to build HTTP client")?;
        let materializer = DownloaderMaterializer::new(MaterializeConfig {
            downloader: config.downloader.clone(),
            normalizer: config.normalizer.clone(),
            staging_dir: config.staging_dir.clone(),
            watch_url: config.watch_url.clone(),
            timeout: config.download_timeout,
            concurrency: config.concurrency,
        });
        let engine = SyncEngine::new(
            Arc::new(source),
            Arc::new(TagScanner),
            Arc::new(materializer),
            Arc::new(FileTagWriter::new(thumbnails)),
        )
        .with_item_concurrency(config.concurrency);

        Ok(Self::from_parts(collections, engine))
    }

    pub fn from_parts(collections: Vec<Collection>, engine: SyncEngine) -> Self {
        Self {
            collections,
            engine,
        }
    }

    /// Syncs every collection in order. A collection that cannot be read is
    /// logged and skipped; the rest still run.
    pub async fn run(&self) -> RunSummary {
        tracing::info!(collections = self.collections.len(), "starting run");
        let mut summary = RunSummary::default();
        for collection in &self.collections {
            let result = self.engine.sync_collection(collection).await;
            if let Err(err) = &result {
                tracing::error!(
                    reference = %collection.reference,
                    error = %err,
                    "collection skipped for this run"
                );
            }
            summary.collections.push(CollectionOutcome {
                reference: collection.reference.clone(),
                result,
            });
        }
        tracing::info!(
            synced = summary.synced(),
            failed = summary.failed(),
            item_failures = summary.item_failures(),
            "run finished"
        );
        summary
    }
}
