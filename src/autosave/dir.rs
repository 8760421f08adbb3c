// src/autosave/dir.rs
//! The auto-save directory: exclusive lock, crash detection, cleanup.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::AutosaveError;
use crate::locked_file::LockedFile;
use crate::persistence::FYP_EXTENSION;

pub const LOCK_FILE_NAME: &str = "autosave.lock";
pub const STATE_FILE_NAME: &str = "autosave.json";

/// Backup blob for entry `id`.
pub fn blob_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("tmp_{id}.{FYP_EXTENSION}"))
}

pub fn state_path(dir: &Path) -> PathBuf {
    dir.join(STATE_FILE_NAME)
}

/// Delete everything in `dir` except the lock sentinel. Returns how many
/// entries were removed; individual failures are logged and skipped.
pub fn purge_dir(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name() == LOCK_FILE_NAME {
            continue;
        }
        let path = entry.path();
        let res = if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match res {
            Ok(()) => removed += 1,
            Err(e) => warn!("cannot remove {}: {e}", path.display()),
        }
    }
    Ok(removed)
}

fn has_backup_blobs(dir: &Path) -> io::Result<bool> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == FYP_EXTENSION) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

pub struct AutosaveDir {
    dir: PathBuf,
    state: DirState,
    lock: Option<LockedFile>,
    first_attempt: bool,
    restore_needed: bool,
}

impl AutosaveDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            state: DirState::Uninitialized,
            lock: None,
            first_attempt: true,
            restore_needed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn state(&self) -> DirState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == DirState::Ready
    }

    /// Leftover backups were found on the first initialization attempt.
    pub fn is_restore_needed(&self) -> bool {
        self.restore_needed
    }

    pub fn clear_restore_needed(&mut self) {
        self.restore_needed = false;
    }

    /// Idempotent once ready; every call after a failure retries.
    ///
    /// Leftover backups only signal a crash on the very first attempt of
    /// this process. On a retry they are purged instead, since the earlier
    /// failure may just have been another instance holding the lock.
    pub fn initialize(&mut self) -> bool {
        if self.state == DirState::Ready {
            return true;
        }
        let first = std::mem::replace(&mut self.first_attempt, false);
        self.state = DirState::Initializing;

        match self.try_initialize(first) {
            Ok(lock) => {
                self.lock = Some(lock);
                self.state = DirState::Ready;
                info!(
                    "auto-save directory {} ready (restore needed: {})",
                    self.dir.display(),
                    self.restore_needed
                );
                true
            }
            Err(e) => {
                debug!("auto-save initialization failed: {e}");
                self.state = DirState::Failed;
                false
            }
        }
    }

    fn try_initialize(&mut self, first: bool) -> Result<LockedFile, AutosaveError> {
        fs::create_dir_all(&self.dir).map_err(|source| AutosaveError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;
        let lock = LockedFile::try_open_exclusive(&self.dir.join(LOCK_FILE_NAME))?;

        if has_backup_blobs(&self.dir)? {
            if first {
                self.restore_needed = true;
            } else {
                let n = purge_dir(&self.dir)?;
                info!("purged {n} stale entries from {}", self.dir.display());
            }
        }
        Ok(lock)
    }

    /// Empty the directory and release the lock. The caller is responsible
    /// for stopping any background job first.
    pub fn shutdown(&mut self) {
        let Some(lock) = self.lock.take() else { return };
        if let Err(e) = purge_dir(&self.dir) {
            warn!("cannot clean auto-save directory: {e}");
        }
        if let Err(e) = lock.unlock() {
            warn!("cannot release auto-save lock: {e}");
        }
        self.state = DirState::Uninitialized;
        self.restore_needed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stray_blobs(dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        fs::write(blob_path(dir, 1), b"{}").unwrap();
        fs::write(blob_path(dir, 2), b"{}").unwrap();
    }

    #[test]
    fn creates_directory_and_sentinel() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("autosave");
        let mut mgr = AutosaveDir::new(&dir);
        assert_eq!(mgr.state(), DirState::Uninitialized);
        assert!(mgr.initialize());
        assert!(mgr.is_ready());
        assert!(dir.join(LOCK_FILE_NAME).is_file());
        assert!(!mgr.is_restore_needed());
        assert!(mgr.initialize());
    }

    #[test]
    fn leftovers_on_first_attempt_need_restore() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("autosave");
        stray_blobs(&dir);

        let mut mgr = AutosaveDir::new(&dir);
        assert!(mgr.initialize());
        assert!(mgr.is_restore_needed());
        assert!(blob_path(&dir, 1).exists());
    }

    #[test]
    fn leftovers_on_retry_are_purged() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("autosave");
        fs::create_dir_all(&dir).unwrap();

        let other = LockedFile::try_open_exclusive(&dir.join(LOCK_FILE_NAME)).unwrap();
        let mut mgr = AutosaveDir::new(&dir);
        assert!(!mgr.initialize());
        assert_eq!(mgr.state(), DirState::Failed);

        other.unlock().unwrap();
        stray_blobs(&dir);
        assert!(mgr.initialize());
        assert!(!mgr.is_restore_needed());
        assert!(!blob_path(&dir, 1).exists());
        assert!(!blob_path(&dir, 2).exists());
        assert!(dir.join(LOCK_FILE_NAME).exists());
    }

    #[test]
    fn shutdown_empties_directory_and_releases_lock() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("autosave");
        let mut mgr = AutosaveDir::new(&dir);
        assert!(mgr.initialize());
        fs::write(blob_path(&dir, 9), b"{}").unwrap();
        fs::write(state_path(&dir), b"[]").unwrap();

        mgr.shutdown();
        let left: Vec<_> = fs::read_dir(&dir).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(left, vec![std::ffi::OsString::from(LOCK_FILE_NAME)]);

        let mut next = AutosaveDir::new(&dir);
        assert!(next.initialize());
    }
}
