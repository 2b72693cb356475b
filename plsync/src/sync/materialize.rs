use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{Mutex, Semaphore};

use super::item::{Item, MediaKind};
use super::paths::{candidate_paths, output_stem, partial_path, staging_path_for};

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: PathBuf, timeout: Duration },
    #[error("{program} exited with {status}: {stderr}")]
    ToolFailed {
        program: PathBuf,
        status: ExitStatus,
        stderr: String,
    },
    #[error("downloader reported success but produced no file at {0}")]
    MissingOutput(PathBuf),
    #[error("both {} and {} already exist", .0[0].display(), .0[1].display())]
    Collision(Box<[PathBuf; 2]>),
    #[error("concurrency limiter is closed")]
    ConcurrencyClosed,
}

#[async_trait]
pub trait Materializer: Send + Sync {
    /// Produces the item's file inside `output_dir` and returns its path.
    /// Nothing is left in `output_dir` when this fails.
    async fn materialize(&self, item: &Item, output_dir: &Path) -> Result<PathBuf, MaterializeError>;
}

#[derive(Debug, Clone)]
pub struct MaterializeConfig {
    pub downloader: PathBuf,
    /// `None` skips loudness normalization.
    pub normalizer: Option<PathBuf>,
    pub staging_dir: PathBuf,
    pub watch_url: String,
    pub timeout: Duration,
    pub concurrency: usize,
}

pub struct DownloaderMaterializer {
    config: MaterializeConfig,
    download_limit: Arc<Semaphore>,
    placement: Mutex<()>,
}

impl DownloaderMaterializer {
    pub fn new(config: MaterializeConfig) -> Self {
        Self {
            download_limit: Arc::new(Semaphore::new(config.concurrency.max(1))),
            placement: Mutex::new(()),
            config,
        }
    }

    fn download_args(&self, item: &Item, staging: &Path) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            staging.to_string_lossy().into_owned(),
            "-q".to_string(),
        ];
        match item.media_kind() {
            MediaKind::Audio => args.extend([
                "-x".to_string(),
                "--audio-format".to_string(),
                MediaKind::Audio.extension().to_string(),
            ]),
            MediaKind::Video => args.extend([
                "-f".to_string(),
                MediaKind::Video.extension().to_string(),
            ]),
        }
        args.push(format!("{}{}", self.config.watch_url, item.id()));
        args
    }

    async fn run_tool(&self, program: &Path, args: &[String]) -> Result<(), MaterializeError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MaterializeError::Spawn {
                program: program.to_path_buf(),
                source,
            })?;

        let output = tokio::time::timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| MaterializeError::Timeout {
                program: program.to_path_buf(),
                timeout: self.config.timeout,
            })??;

        if !output.status.success() {
            return Err(MaterializeError::ToolFailed {
                program: program.to_path_buf(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn produce(&self, item: &Item, staging: &Path) -> Result<(), MaterializeError> {
        let _permit = self
            .download_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| MaterializeError::ConcurrencyClosed)?;

        self.run_tool(&self.config.downloader, &self.download_args(item, staging))
            .await?;
        if !tokio::fs::try_exists(staging).await? {
            return Err(MaterializeError::MissingOutput(staging.to_path_buf()));
        }

        if item.media_kind() == MediaKind::Audio
            && let Some(normalizer) = &self.config.normalizer
        {
            let args = [
                "-r".to_string(),
                "-c".to_string(),
                "-q".to_string(),
                staging.to_string_lossy().into_owned(),
            ];
            self.run_tool(normalizer, &args).await?;
        }
        Ok(())
    }

    /// Picks a free name and moves the staged file there. Serialized so two
    /// items never claim the same disambiguated name.
    async fn place(
        &self,
        item: &Item,
        staging: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, MaterializeError> {
        let _guard = self.placement.lock().await;
        tokio::fs::create_dir_all(output_dir).await?;

        let ext = item.media_kind().extension();
        let stem = output_stem(item.title(), item.id());
        let candidates = candidate_paths(output_dir, &stem, item.id(), ext);
        let mut target = None;
        for candidate in &candidates {
            if !tokio::fs::try_exists(candidate).await? {
                target = Some(candidate.clone());
                break;
            }
        }
        let Some(target) = target else {
            return Err(MaterializeError::Collision(Box::new(candidates)));
        };

        move_file(staging, &target).await?;
        Ok(target)
    }
}

#[async_trait]
impl Materializer for DownloaderMaterializer {
    async fn materialize(&self, item: &Item, output_dir: &Path) -> Result<PathBuf, MaterializeError> {
        tokio::fs::create_dir_all(&self.config.staging_dir).await?;
        let staging = staging_path_for(
            &self.config.staging_dir,
            item.id(),
            item.media_kind().extension(),
        );
        remove_if_present(&staging).await?;

        let result = match self.produce(item, &staging).await {
            Ok(()) => self.place(item, &staging, output_dir).await,
            Err(err) => Err(err),
        };
        if result.is_err() {
            let _ = remove_if_present(&staging).await;
        }
        result
    }
}

async fn remove_if_present(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Rename, or copy through a `.partial` sibling when the staging dir lives on
/// another filesystem.
async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => copy_across(from, to).await,
        Err(err) => Err(err),
    }
}

/// Once `to` exists the item is placed; a leftover staging file is only
/// logged.
async fn copy_across(from: &Path, to: &Path) -> io::Result<()> {
    let partial = partial_path(to);
    let placed = match tokio::fs::copy(from, &partial).await {
        Ok(_) => tokio::fs::rename(&partial, to).await,
        Err(err) => Err(err),
    };
    if let Err(err) = placed {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(err);
    }
    if let Err(err) = tokio::fs::remove_file(from).await {
        tracing::warn!(path = %from.display(), error = %err, "failed to remove staged file");
    }
    Ok(())
}
