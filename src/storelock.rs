//! Advisory exclusive file locking for on-disk stores (spec.md §5/§6).
//!
//! This crate does not own directory-level store lifecycle — opening a
//! store's directory, deciding its path layout, and wiring up the B+Tree /
//! tag-mapping / TSD readers against it is an external collaborator's job
//! (spec.md's out-of-scope list names "generic file-lock helpers"
//! explicitly). What the ambient concurrency model does require, and what
//! this module provides, is the one primitive every such caller needs: an
//! advisory exclusive lock on a store's `LOCK` file, held for the store's
//! lifetime and released on close or failed open.
//!
//! Grounded on `prataprc-rdms`'s advisory file-lock pattern for its
//! storage engine — the teacher repo has no file-locking crate since its
//! own engine enforces single-process ownership at a higher layer.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

/// Errors acquiring or releasing a store's advisory lock.
#[derive(Debug, Error)]
pub enum StoreLockError {
    /// The `LOCK` file could not be created or opened.
    #[error("failed to open lock file at {path}: {source}")]
    Open {
        /// The lock file's path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Another process already holds the exclusive lock.
    #[error("store at {path} is already locked by another process")]
    AlreadyLocked {
        /// The lock file's path.
        path: PathBuf,
    },
}

/// Holds an advisory exclusive lock on `<root>/LOCK` for as long as it's
/// alive; the lock is released when this value is dropped.
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Acquires the exclusive lock on `root`'s `LOCK` file, creating the
    /// file if it doesn't exist. Fails immediately (non-blocking) if
    /// another process already holds it — this is the only fatal
    /// condition on store open, per spec.md §6.
    pub fn acquire(root: impl AsRef<Path>) -> Result<Self, StoreLockError> {
        let path = root.as_ref().join("LOCK");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|source| StoreLockError::Open {
                path: path.clone(),
                source,
            })?;

        file.try_lock_exclusive()
            .map_err(|_| StoreLockError::AlreadyLocked { path: path.clone() })?;

        Ok(Self { file, path })
    }

    /// The lock file's path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_second_acquire_on_the_same_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let first = StoreLock::acquire(dir.path()).unwrap();
        let second = StoreLock::acquire(dir.path());
        assert!(matches!(second, Err(StoreLockError::AlreadyLocked { .. })));
        drop(first);
    }

    #[test]
    fn lock_is_released_on_drop_and_can_be_reacquired() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = StoreLock::acquire(dir.path()).unwrap();
        }
        let reacquired = StoreLock::acquire(dir.path());
        assert!(reacquired.is_ok());
    }
}
