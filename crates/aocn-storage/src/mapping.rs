use std::path::{Path, PathBuf};
use std::time::Duration;

use aocn_core::IdentityMapping;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::lock::FileLock;
use crate::{read_json_if_exists, write_json_atomic, StoreError};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote leaderboard id -> platform user id, persisted as a flat JSON object.
///
/// The file only supports whole-file rewrites, so every mutation runs its
/// full read-modify-write under the in-process mutex and an exclusive
/// advisory lock on `<path>.lock`. The file lock serializes separate
/// processes (`aocn link` next to `aocn run`) working on the same mapping.
#[derive(Debug)]
pub struct IdentityMappingStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    lock: Mutex<()>,
}

/// Both halves of the write lock; dropping it releases the file lock first.
struct WriteGuard<'a> {
    _file: FileLock,
    _local: MutexGuard<'a, ()>,
}

impl IdentityMappingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            lock_path: FileLock::path_for(&path),
            path,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock: Mutex::new(()),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    async fn lock_for_write(&self) -> Result<WriteGuard<'_>, StoreError> {
        let local = self.lock.lock().await;
        let file = FileLock::acquire(self.lock_path.clone(), self.lock_timeout).await?;
        Ok(WriteGuard {
            _file: file,
            _local: local,
        })
    }

    /// Whole mapping; empty when the file does not exist yet.
    pub async fn load(&self) -> Result<IdentityMapping, StoreError> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    pub async fn get(&self, remote_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.load().await?.remove(remote_id))
    }

    /// Link `remote_id` to `platform_id`. Any other remote id already linked to
    /// the same platform id is dropped, so one platform user owns at most one link.
    ///
    /// A corrupt file aborts the write; it is never replaced by a fresh mapping.
    pub async fn set(&self, remote_id: &str, platform_id: &str) -> Result<(), StoreError> {
        let _guard = self.lock_for_write().await?;
        let mut mapping = self.read().await?;

        let stale: Vec<String> = mapping
            .iter()
            .filter(|(remote, platform)| platform.as_str() == platform_id && remote.as_str() != remote_id)
            .map(|(remote, _)| remote.clone())
            .collect();
        for remote in &stale {
            debug!(remote_id = %remote, platform_id, "dropping previous link");
            mapping.remove(remote);
        }

        mapping.insert(remote_id.to_string(), platform_id.to_string());
        write_json_atomic(&self.path, &mapping).await?;
        info!(remote_id, platform_id, "linked identity");
        Ok(())
    }

    /// Remove the first entry pointing at `platform_id`. `Ok(None)` means there
    /// was nothing to remove and the file was left untouched.
    pub async fn remove(&self, platform_id: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock_for_write().await?;
        let mut mapping = self.read().await?;

        let Some(remote_id) = mapping
            .iter()
            .find(|(_, platform)| platform.as_str() == platform_id)
            .map(|(remote, _)| remote.clone())
        else {
            return Ok(None);
        };

        mapping.remove(&remote_id);
        write_json_atomic(&self.path, &mapping).await?;
        info!(remote_id = %remote_id, platform_id, "unlinked identity");
        Ok(Some(remote_id))
    }

    async fn read(&self) -> Result<IdentityMapping, StoreError> {
        Ok(read_json_if_exists(&self.path).await?.unwrap_or_default())
    }
}
