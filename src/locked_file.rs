// src/locked_file.rs
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use fs2::FileExt;

use crate::error::AutosaveError;

/// Sentinel file holding an exclusive advisory lock for as long as it lives.
pub struct LockedFile(File);

impl LockedFile {
    /// Open (or create) `path` and take the lock without blocking.
    /// A freshly created sentinel gets a small JSON creation stamp.
    pub fn try_open_exclusive(path: &Path) -> Result<Self, AutosaveError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            return Err(if e.kind() == io::ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
            {
                AutosaveError::Locked
            } else {
                AutosaveError::Io(e)
            });
        }

        if file.metadata()?.len() == 0 {
            let stamp = serde_json::json!({ "created": chrono::Utc::now().to_rfc3339() });
            file.write_all(stamp.to_string().as_bytes())?;
            file.sync_data()?;
        }
        Ok(Self(file))
    }

    pub fn unlock(self) -> io::Result<()> {
        FileExt::unlock(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_handle_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("autosave.lock");

        let first = LockedFile::try_open_exclusive(&path).unwrap();
        assert!(matches!(
            LockedFile::try_open_exclusive(&path),
            Err(AutosaveError::Locked)
        ));

        first.unlock().unwrap();
        assert!(LockedFile::try_open_exclusive(&path).is_ok());
    }

    #[test]
    fn new_sentinel_gets_creation_stamp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("autosave.lock");
        let _lock = LockedFile::try_open_exclusive(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(v["created"].is_string());
    }
}
