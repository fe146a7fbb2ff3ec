//! Exclusive access to stores and archives

use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// An exclusive OS lock on a `<target>.lock` sidecar file.
///
/// The lock is released when this value is dropped. The sidecar file itself is left
/// in place so two processes never race on creating and deleting it.
#[derive(Debug)]
pub struct StoreLock {
    _file: File,
    target: PathBuf,
}

impl StoreLock {
    /// Path of the sidecar lock file for `target`
    #[must_use]
    pub fn lock_path(target: &Path) -> PathBuf {
        let mut name = target.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Take the lock for `target`, failing fast if someone else holds it
    ///
    /// # Errors
    /// Returns [`Error::ResourceLocked`] if another handle holds the lock.
    pub fn acquire(target: &Path) -> Result<Self> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(Self::lock_path(target))?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(Error::ResourceLocked {
                    path: target.to_path_buf(),
                });
            }
            Err(TryLockError::Error(err)) => return Err(err.into()),
        }

        tracing::debug!("Locked {}", target.display());
        Ok(Self {
            _file: file,
            target: target.to_path_buf(),
        })
    }

    /// The locked path
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }
}
