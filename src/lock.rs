use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{LaunchError, Result};

/// Exclusive advisory lock that keeps a second instance from starting.
///
/// The lock is released when the value is dropped or the process exits.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    _file: File,
}

impl InstanceLock {
    /// Take the lock at `path`, creating the file and its parent directory
    /// if needed. Fails with [`LaunchError::LockHeld`] rather than waiting.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        if let Err(err) = file.try_lock_exclusive() {
            let contended = fs2::lock_contended_error();
            return if err.raw_os_error() == contended.raw_os_error() {
                Err(LaunchError::LockHeld(path.to_path_buf()))
            } else {
                Err(err.into())
            };
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        tracing::debug!(path = %path.display(), "Acquired instance lock");
        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
