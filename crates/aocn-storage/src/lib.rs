//! File-backed state (snapshot cache + identity mapping) and leaderboard fetch for AOCN.

use std::path::{Path, PathBuf};
use std::time::Duration;

use aocn_core::Snapshot;
use chrono::{DateTime, Utc};
use serde_json::Error as JsonError;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

mod fetch;
mod lock;
mod mapping;

pub use fetch::{DEFAULT_BASE_URL, FetchError, LeaderboardClient, LeaderboardClientConfig, LeaderboardSource};
pub use mapping::{IdentityMappingStore, DEFAULT_LOCK_TIMEOUT};

pub const CRATE_NAME: &str = "aocn-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    /// The file exists but is not valid JSON for its type. Never treated as empty.
    #[error("corrupt state file {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: JsonError,
    },
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out after {waited:?} waiting for lock {}", .path.display())]
    LockTimeout { path: PathBuf, waited: Duration },
    #[error("encoding {}: {source}", .path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: JsonError,
    },
}

impl StoreError {
    fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

/// Reads and parses a JSON file; `Ok(None)` when the file does not exist yet.
pub(crate) async fn read_json_if_exists<T>(path: &Path) -> Result<Option<T>, StoreError>
where
    T: serde::de::DeserializeOwned,
{
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StoreError::io("reading", path, err)),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Serialize pretty JSON and replace `path` through a temp file + rename, so a
/// crash mid-write never leaves a truncated file behind.
pub(crate) async fn write_json_atomic<T>(path: &Path, value: &T) -> Result<(), StoreError>
where
    T: serde::Serialize,
{
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Encode {
        path: path.to_path_buf(),
        source,
    })?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .map_err(|err| StoreError::io("creating directory", &parent, err))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .map_err(|err| StoreError::io("opening temp file", &temp_path, err))?;
    let written = async {
        file.write_all(&bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StoreError::io("writing temp file", &temp_path, err));
    }

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StoreError::io("renaming temp file onto", path, err));
    }
    Ok(())
}

/// Last-seen leaderboard snapshot, persisted as one JSON file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file means first run and yields an empty snapshot. A file that
    /// exists but fails to parse is an error, so diff history is never wiped.
    pub async fn load(&self) -> Result<Snapshot, StoreError> {
        Ok(read_json_if_exists(&self.path).await?.unwrap_or_default())
    }

    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        write_json_atomic(&self.path, snapshot).await
    }

    /// `<cache>.<YYYYmmdd.HH.MM.SS>.backup`, next to the cache file.
    pub fn backup_path(&self, taken_at: DateTime<Utc>) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(taken_at.format(".%Y%m%d.%H.%M.%S.backup").to_string());
        PathBuf::from(name)
    }

    /// Move the current cache aside to a timestamped backup, then write `snapshot`.
    /// Returns the backup path, or `None` when there was no cache to preserve.
    pub async fn backup_and_replace(
        &self,
        snapshot: &Snapshot,
        taken_at: DateTime<Utc>,
    ) -> Result<Option<PathBuf>, StoreError> {
        let mut backup = self.backup_path(taken_at);
        if fs::try_exists(&backup)
            .await
            .map_err(|err| StoreError::io("checking backup path", &backup, err))?
        {
            let mut name = backup.into_os_string();
            name.push(format!(".{}", Uuid::new_v4()));
            backup = PathBuf::from(name);
        }

        let moved = match fs::rename(&self.path, &backup).await {
            Ok(()) => {
                info!(cache = %self.path.display(), backup = %backup.display(), "backed up snapshot cache");
                Some(backup)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(cache = %self.path.display(), "no snapshot cache to back up");
                None
            }
            Err(err) => return Err(StoreError::io("backing up", &self.path, err)),
        };

        self.save(snapshot).await?;
        Ok(moved)
    }
}
