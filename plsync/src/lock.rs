//! Process-wide run lock backed by an exclusively created marker file.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;
use thiserror::Error;
use tokio::task::JoinHandle;

const RETRY_BASE: Duration = Duration::from_millis(200);
const RETRY_MAX: Duration = Duration::from_secs(5);
const MIN_HEARTBEAT: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another run holds {0}")]
    Busy(PathBuf),
    #[error("lock I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// One attempt.
    Immediate,
    /// Retry until the duration has elapsed.
    Bounded(Duration),
    Indefinite,
}

/// Held for the whole run. While held, the marker's mtime is refreshed well
/// inside `stale_after`; dropping it removes the marker if it is still ours.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    token: String,
    heartbeat: JoinHandle<()>,
}

impl RunLock {
    /// Markers not refreshed for `stale_after` belong to a run that died
    /// without cleaning up and are removed.
    pub async fn acquire(
        path: &Path,
        mode: LockMode,
        stale_after: Duration,
    ) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let token = new_token(&mut rand::thread_rng());
        let deadline = match mode {
            LockMode::Bounded(wait) => Some(Instant::now() + wait),
            LockMode::Immediate | LockMode::Indefinite => None,
        };
        let mut attempt = 0u32;
        loop {
            if try_create(path, &token).map_err(io_err)? {
                tracing::debug!(path = %path.display(), "run lock acquired");
                let heartbeat = tokio::spawn(heartbeat(
                    path.to_path_buf(),
                    token.clone(),
                    (stale_after / 3).max(MIN_HEARTBEAT),
                ));
                return Ok(Self {
                    path: path.to_path_buf(),
                    token,
                    heartbeat,
                });
            }
            if remove_if_stale(path, stale_after).map_err(io_err)? {
                continue;
            }

            let delay = retry_delay(attempt, &mut rand::thread_rng());
            let delay = match (mode, deadline) {
                (LockMode::Immediate, _) => return Err(LockError::Busy(path.to_path_buf())),
                (_, Some(deadline)) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(LockError::Busy(path.to_path_buf()));
                    }
                    delay.min(left)
                }
                (_, None) => delay,
            };
            if attempt == 0 {
                tracing::info!(path = %path.display(), "another run is active, waiting");
            }
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        self.heartbeat.abort();
        match holds(&self.path, &self.token) {
            Ok(true) => {
                if let Err(err) = std::fs::remove_file(&self.path)
                    && err.kind() != io::ErrorKind::NotFound
                {
                    tracing::warn!(path = %self.path.display(), error = %err, "failed to remove run lock");
                }
            }
            Ok(false) => {
                tracing::warn!(path = %self.path.display(), "run lock was taken over, leaving marker");
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to read run lock");
            }
        }
    }
}

/// Marker contents: pid, start time in seconds and a random nonce.
fn new_token<R: Rng + ?Sized>(rng: &mut R) -> String {
    let started = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since| since.as_secs())
        .unwrap_or_default();
    format!("{}\n{started}\n{:016x}\n", std::process::id(), rng.r#gen::<u64>())
}

fn try_create(path: &Path, token: &str) -> io::Result<bool> {
    let mut file = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => return Err(err),
    };
    file.write_all(token.as_bytes())?;
    Ok(true)
}

/// False once the marker is gone or carries someone else's token.
fn holds(path: &Path, token: &str) -> io::Result<bool> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents == token),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

fn touch_if_held(path: &Path, token: &str) -> io::Result<bool> {
    if !holds(path, token)? {
        return Ok(false);
    }
    std::fs::OpenOptions::new()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())?;
    Ok(true)
}

async fn heartbeat(path: PathBuf, token: String, every: Duration) {
    loop {
        tokio::time::sleep(every).await;
        let (marker, owner) = (path.clone(), token.clone());
        match tokio::task::spawn_blocking(move || touch_if_held(&marker, &owner)).await {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                tracing::warn!(path = %path.display(), "run lock is no longer ours");
                return;
            }
            Ok(Err(err)) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to refresh run lock");
            }
            Err(err) => {
                tracing::warn!(error = %err, "run lock refresh task failed");
            }
        }
    }
}

fn remove_if_stale(path: &Path, stale_after: Duration) -> io::Result<bool> {
    let modified = match std::fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        // Released between our attempt and this check.
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(err),
    };
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or_default();
    if age < stale_after {
        return Ok(false);
    }
    tracing::warn!(path = %path.display(), age_secs = age.as_secs(), "removing stale run lock");
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(err) => Err(err),
    }
}

/// Full-jitter exponential delay.
fn retry_delay<R: Rng + ?Sized>(attempt: u32, rng: &mut R) -> Duration {
    let base_ms = RETRY_BASE.as_millis() as u64;
    let max_ms = RETRY_MAX.as_millis() as u64;
    let ceiling = base_ms.saturating_mul(1u64 << attempt.min(16)).min(max_ms);
    Duration::from_millis(rng.gen_range(base_ms.min(ceiling)..=ceiling))
}
