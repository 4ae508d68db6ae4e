//! Key/value persistence backing the profile store.
//!
//! Each key holds one structured-text blob. The file backend keeps one
//! `<key>.toml` file per key inside the config directory.

use crate::error::{AppError, AppResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

pub trait Storage: Send + Sync {
    /// Read the blob stored under `key`, `None` when nothing was ever written
    fn get_item(&self, key: &str) -> AppResult<Option<String>>;

    /// Replace the blob stored under `key`
    fn set_item(&self, key: &str, value: &str) -> AppResult<()>;
}

/// File-per-key storage rooted at a directory
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> AppResult<PathBuf> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AppError::InvalidArgument(format!(
                "Invalid storage key '{}'",
                key.chars().take(50).collect::<String>()
            )));
        }
        Ok(self.dir.join(format!("{}.toml", key)))
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> AppResult<Option<String>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| AppError::Persistence(format!("Failed to read {}: {}", path.display(), e)))
    }

    fn set_item(&self, key: &str, value: &str) -> AppResult<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)
            .map_err(|e| AppError::Persistence(format!("Failed to create {}: {}", self.dir.display(), e)))?;

        // Write next to the target and rename so readers never see half a file
        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, value)
            .map_err(|e| AppError::Persistence(format!("Failed to write {}: {}", tmp_path.display(), e)))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            AppError::Persistence(format!("Failed to replace {}: {}", path.display(), e))
        })?;

        #[cfg(unix)]
        {
            // Profiles carry passwords
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o600));
        }

        Ok(())
    }
}

/// Process-local storage, used when nothing should touch disk
#[derive(Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.items.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> AppResult<()> {
        self.items.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("nested"));

        assert_eq!(storage.get_item("ftp_configs").unwrap(), None);
        storage.set_item("ftp_configs", "a = 1\n").unwrap();
        assert_eq!(
            storage.get_item("ftp_configs").unwrap().as_deref(),
            Some("a = 1\n")
        );
        assert!(dir.path().join("nested/ftp_configs.toml").exists());
        assert!(!dir.path().join("nested/ftp_configs.toml.tmp").exists());
    }

    #[test]
    fn test_file_storage_rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        assert!(storage.get_item("../etc/passwd").is_err());
        assert!(storage.set_item("a/b", "x").is_err());
        assert!(storage.set_item("", "x").is_err());
    }

    #[test]
    fn test_file_storage_write_failure_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the directory should be
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();
        let storage = FileStorage::new(blocker.join("inner"));

        let err = storage.set_item("ftp_configs", "x").unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
    }
}
