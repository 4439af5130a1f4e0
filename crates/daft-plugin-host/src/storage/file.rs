//! File-backed key-value store.
//!
//! Each key maps to `<dir>/<percent-encoded key>.json`. Writes are atomic:
//! 1. Write to a temp file in the same directory
//! 2. fsync so the data reaches disk
//! 3. Rename over the target

use super::KeyValueStore;
use crate::config::SandboxConfig;
use crate::error::{PluginHostError, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Key-value store that keeps one JSON file per key.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Store files under `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under the platform data directory
    /// (e.g. `~/.local/share/plugin-host` on Linux).
    pub fn open_default() -> Result<Self> {
        let base = dirs::data_dir().ok_or_else(|| PluginHostError::Config {
            message: "No platform data directory available".to_string(),
        })?;
        Ok(Self::new(base.join(SandboxConfig::STORE_DIR_NAME)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path backing `key`.
    ///
    /// The key is percent-encoded, so distinct keys always map to distinct
    /// files and no key can escape the store directory.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(key)))
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PluginHostError::io_with_path(e, path)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let dir = self.dir.clone();
        let path = self.path_for(key);
        let value = value.to_string();

        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &value))
            .await
            .map_err(|e| PluginHostError::Storage {
                message: format!("Store write task failed: {}", e),
            })?
    }
}

fn write_atomic(dir: &Path, path: &Path, value: &str) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| PluginHostError::io_with_path(e, dir))?;

    let mut temp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| PluginHostError::io_with_path(e, dir))?;
    temp.write_all(value.as_bytes())
        .map_err(|e| PluginHostError::io_with_path(e, temp.path()))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| PluginHostError::io_with_path(e, temp.path()))?;
    temp.persist(path)
        .map_err(|e| PluginHostError::io_with_path(e.error, path))?;

    debug!("Wrote {} bytes to {}", value.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path());
        assert_eq!(store.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_creates_dir_and_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("nested"));

        store.set("daft.records", "[1]").await.unwrap();
        store.set("daft.records", "[1,2]").await.unwrap();

        assert_eq!(store.get("daft.records").await.unwrap().as_deref(), Some("[1,2]"));
        assert!(store.path_for("daft.records").exists());
    }

    #[test]
    fn test_key_encoded() {
        let store = JsonFileStore::new("/tmp/store");
        assert_eq!(
            store.path_for("../etc/passwd"),
            PathBuf::from("/tmp/store/..%2Fetc%2Fpasswd.json")
        );
        assert_eq!(
            store.path_for("daft.plugin-sandbox.records"),
            PathBuf::from("/tmp/store/daft.plugin-sandbox.records.json")
        );
    }

    #[tokio::test]
    async fn test_similar_keys_do_not_collide() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path());

        assert_ne!(store.path_for("a/b"), store.path_for("a_b"));
        assert_ne!(store.path_for("a/b"), store.path_for("a%2Fb"));

        store.set("a/b", "slash").await.unwrap();
        store.set("a_b", "underscore").await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap().as_deref(), Some("slash"));
        assert_eq!(store.get("a_b").await.unwrap().as_deref(), Some("underscore"));
    }
}
