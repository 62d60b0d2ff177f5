use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::StoreError;

/// Exclusive advisory lock on a sibling `.lock` file, held across processes.
///
/// Released on drop.
#[derive(Debug)]
pub(crate) struct FileLock {
    file: File,
}

impl FileLock {
    /// `<path>.lock`, next to the file being guarded.
    pub(crate) fn path_for(guarded: &Path) -> PathBuf {
        let mut name = guarded.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Blocks the calling thread; poll with `try_lock_exclusive` until `timeout`.
    pub(crate) fn acquire_blocking(path: &Path, timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|err| StoreError::io("creating directory", parent, err))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|err| StoreError::io("opening lock file", path, err))?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file }),
                Err(err) if err.kind() == fs2::lock_contended_error().kind() => {}
                Err(err) => return Err(StoreError::io("locking", path, err)),
            }

            if start.elapsed() >= timeout {
                return Err(StoreError::LockTimeout {
                    path: path.to_path_buf(),
                    waited: start.elapsed(),
                });
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Acquire on the blocking pool so async workers never stall on contention.
    pub(crate) async fn acquire(path: PathBuf, timeout: Duration) -> Result<Self, StoreError> {
        let lock_path = path.clone();
        tokio::task::spawn_blocking(move || Self::acquire_blocking(&lock_path, timeout))
            .await
            .map_err(|err| StoreError::io("locking", &path, io::Error::other(err)))?
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lock_path_is_a_sibling() {
        assert_eq!(
            FileLock::path_for(Path::new("/srv/aocn/mapping.json")),
            PathBuf::from("/srv/aocn/mapping.json.lock")
        );
    }

    #[test]
    fn second_holder_times_out_until_first_drops() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("mapping.json.lock");

        let held = FileLock::acquire_blocking(&path, Duration::from_secs(1)).expect("first");
        let err = FileLock::acquire_blocking(&path, Duration::from_millis(50)).expect_err("contended");
        assert!(matches!(err, StoreError::LockTimeout { .. }));

        drop(held);
        FileLock::acquire_blocking(&path, Duration::from_millis(50)).expect("released");
    }
}
