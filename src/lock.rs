//! File-based locking so two invocations never edit the firewall at once.
//!
//! Uses flock-style advisory locking on `<config dir>/.lock`.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const LOCK_FILE_NAME: &str = ".lock";

/// Holds an exclusive lock until dropped.
pub struct LockGuard {
    _file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Attempt to acquire the lock without blocking.
    /// Fails if another instance holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        let path = dir.join(LOCK_FILE_NAME);

        // create+read+write without truncate: no race between create and lock
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .context("Failed to set lock file permissions")?;

        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "Another sdrpick command is already changing firewall rules.\n\
                 Wait for it to finish, or remove the lock file if it is stale: {}",
                path.display()
            )
        })?;

        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// Released when the file handle is closed (on drop)
