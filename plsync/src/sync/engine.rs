use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use plsync_core::{PlaylistClient, PlaylistListing, SourceError};
use thiserror::Error;
use tracing::Instrument;

use super::item::{AlbumArtist, CollectionInfo, Item, MediaKind};
use super::materialize::Materializer;
use super::reconcile::{ItemSet, pending_writes, reconcile};
use super::scan::{LibraryScanner, ScanError};
use super::tags::{TagWriter, WriteOutcome};
use crate::config::Collection;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("local scan failed: {0}")]
    Scan(#[from] ScanError),
    #[error("remote listing unavailable: {0}")]
    Source(#[from] SourceError),
}

#[async_trait]
pub trait PlaylistSource: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<PlaylistListing, SourceError>;
}

#[async_trait]
impl PlaylistSource for PlaylistClient {
    async fn fetch(&self, reference: &str) -> Result<PlaylistListing, SourceError> {
        self.fetch_playlist(reference).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Materialize,
    WriteBack,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureStage::Materialize => "materialize",
            FailureStage::WriteBack => "write-back",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub id: String,
    pub stage: FailureStage,
    pub reason: String,
}

/// Outcome of one collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Items in the merged set.
    pub merged: usize,
    /// Remote entries dropped because no item could be built from them.
    pub dropped: usize,
    pub materialized: usize,
    pub rewritten: usize,
    pub unchanged: usize,
    pub failures: Vec<ItemFailure>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, result: ItemResult) {
        if result.materialized {
            self.materialized += 1;
        }
        if result.rewritten {
            self.rewritten += 1;
        }
        match result.failure {
            Some(failure) => self.failures.push(failure),
            None if !result.materialized && !result.rewritten => self.unchanged += 1,
            None => {}
        }
    }
}

#[derive(Debug, Default)]
struct ItemResult {
    materialized: bool,
    rewritten: bool,
    failure: Option<ItemFailure>,
}

impl ItemResult {
    fn failed(mut self, item: &Item, stage: FailureStage, reason: impl ToString) -> Self {
        self.failure = Some(ItemFailure {
            id: item.id().to_string(),
            stage,
            reason: reason.to_string(),
        });
        self
    }
}

pub struct SyncEngine {
    source: Arc<dyn PlaylistSource>,
    scanner: Arc<dyn LibraryScanner>,
    materializer: Arc<dyn Materializer>,
    writer: Arc<dyn TagWriter>,
    item_concurrency: usize,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn PlaylistSource>,
        scanner: Arc<dyn LibraryScanner>,
        materializer: Arc<dyn Materializer>,
        writer: Arc<dyn TagWriter>,
    ) -> Self {
        Self {
            source,
            scanner,
            materializer,
            writer,
            item_concurrency: 1,
        }
    }

    pub fn with_item_concurrency(mut self, limit: usize) -> Self {
        self.item_concurrency = limit.max(1);
        self
    }

    /// Runs one full pass for a collection. Errors mean nothing was touched:
    /// either side of the diff could not be read.
    pub async fn sync_collection(&self, collection: &Collection) -> Result<SyncReport, EngineError> {
        let span = tracing::info_span!("collection", reference = %collection.reference);
        self.sync_collection_inner(collection).instrument(span).await
    }

    async fn sync_collection_inner(&self, collection: &Collection) -> Result<SyncReport, EngineError> {
        // Local first: its channels seed the album artist.
        let local = self.scanner.scan(&collection.output_dir).await?;
        let listing = self.source.fetch(&collection.reference).await?;
        if !listing.complete {
            tracing::warn!("downloader exited with an error, listing may be partial");
        }

        let mut artist = AlbumArtist::default();
        for item in local.values() {
            artist.observe(item.channel());
        }
        let (remote, dropped) = remote_items(&listing, &mut artist, collection.media_kind);
        tracing::info!(
            local = local.len(),
            remote = remote.len(),
            dropped,
            "fetched collection state"
        );

        let merged = reconcile(local, remote);
        tracing::info!(items = merged.len(), pending = pending_writes(&merged), "reconciled");

        let mut report = SyncReport {
            merged: merged.len(),
            dropped,
            ..SyncReport::default()
        };
        let output_dir = collection.output_dir.as_path();
        let mut results = stream::iter(merged)
            .map(|item| self.apply(item, output_dir))
            .buffer_unordered(self.item_concurrency);
        while let Some(result) = results.next().await {
            report.record(result);
        }

        tracing::info!(
            materialized = report.materialized,
            rewritten = report.rewritten,
            unchanged = report.unchanged,
            failed = report.failures.len(),
            "collection synced"
        );
        Ok(report)
    }

    async fn apply(&self, mut item: Item, output_dir: &Path) -> ItemResult {
        let mut result = ItemResult::default();

        if item.local_path().is_none() {
            match self.materializer.materialize(&item, output_dir).await {
                Ok(path) => {
                    tracing::info!(id = item.id(), path = %path.display(), "materialized");
                    item.mark_materialized(path);
                    result.materialized = true;
                }
                Err(err) => {
                    tracing::error!(id = item.id(), error = %err, "materialization failed");
                    return result.failed(&item, FailureStage::Materialize, err);
                }
            }
        }

        if !item.needs_write() {
            return result;
        }
        tracing::debug!(id = item.id(), changes = ?item.changes(), fresh = item.is_fresh(), "writing tags");
        match self.writer.write(&item).await {
            Ok(outcome) => {
                item.clear_changes();
                result.rewritten = outcome == WriteOutcome::Written;
                result
            }
            Err(err) => {
                tracing::error!(id = item.id(), error = %err, "write-back failed");
                result.failed(&item, FailureStage::WriteBack, err)
            }
        }
    }
}

/// Builds the remote item set. Entries that cannot become items are dropped
/// with a warning; the first entry wins when an id repeats.
fn remote_items(
    listing: &PlaylistListing,
    artist: &mut AlbumArtist,
    media_kind: MediaKind,
) -> (ItemSet, usize) {
    let mut entries = Vec::new();
    let mut dropped = 0;
    for (position, entry) in listing.entries() {
        match entry {
            Ok(entry) => {
                artist.observe(entry.artist());
                entries.push((position, entry));
            }
            Err(err) => {
                tracing::warn!(position, error = %err, "malformed playlist entry");
                dropped += 1;
            }
        }
    }

    let info = CollectionInfo {
        name: listing.title.clone(),
        artist: artist.resolve(),
        media_kind,
    };
    let mut items = ItemSet::new();
    for (position, entry) in entries {
        let item = match Item::from_remote(&entry, position, &info) {
            Ok(item) => item,
            Err(err) => {
                tracing::warn!(position, error = %err, "dropping playlist entry");
                dropped += 1;
                continue;
            }
        };
        if items.contains_key(item.id()) {
            tracing::warn!(id = item.id(), position, "duplicate playlist entry");
            dropped += 1;
            continue;
        }
        items.insert(item.id().to_string(), item);
    }
    (items, dropped)
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
