//! File-backed [`KeyValueStore`].
//!
//! All entries live in a single JSON map file. Every mutation rewrites
//! the file atomically (write to temp file, then rename), so a batch
//! write either fully lands or leaves the previous file intact. Values
//! are hex-encoded since ciphertext is not valid UTF-8.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{KeyValueStore, StorageError, StorageResult};

/// Store file name inside the data directory.
pub const STORE_FILE_NAME: &str = "wallet-store.json";

pub struct FileStore {
    path: PathBuf,
    /// In-memory view of the file; flushed on every mutation.
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl FileStore {
    /// Open (or create) a store backed by `STORE_FILE_NAME` under
    /// `data_dir`. Reads the existing file once; later reads are
    /// served from memory.
    pub fn open(data_dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir: PathBuf = data_dir.into();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(STORE_FILE_NAME);

        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let encoded: BTreeMap<String, String> = serde_json::from_str(&content)?;
            let mut decoded = BTreeMap::new();
            for (key, value) in encoded {
                let bytes = hex::decode(&value)
                    .map_err(|e| StorageError::Other(format!("corrupt entry {key}: {e}")))?;
                decoded.insert(key, bytes);
            }
            decoded
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Write the full map to disk atomically.
    fn persist(&self, entries: &BTreeMap<String, Vec<u8>>) -> StorageResult<()> {
        let encoded: BTreeMap<&String, String> =
            entries.iter().map(|(k, v)| (k, hex::encode(v))).collect();
        let content = serde_json::to_string_pretty(&encoded)?;

        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, &self.path)?;

        // The file holds ciphertext and grant data; keep it private.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&self.path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(&self.path, perms)?;
        }

        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }

    async fn set_many(&self, batch: Vec<(String, Vec<u8>)>) -> StorageResult<()> {
        let mut entries = self.entries.write().await;
        for (key, value) in batch {
            entries.insert(key, value);
        }
        self.persist(&entries)
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        self.persist(&entries)
    }

    async fn remove_many(&self, keys: &[String]) -> StorageResult<()> {
        let mut entries = self.entries.write().await;
        for key in keys {
            entries.remove(key);
        }
        self.persist(&entries)
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wvc-filestore-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn test_roundtrip_across_reopen() {
        let dir = temp_dir("reopen");
        {
            let store = FileStore::open(&dir).unwrap();
            store.set("k", vec![0u8, 255, 7]).await.unwrap();
        }
        let store = FileStore::open(&dir).unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(vec![0u8, 255, 7]));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_batch_write_lands_whole() {
        let dir = temp_dir("batch");
        let store = FileStore::open(&dir).unwrap();
        store
            .set_many(vec![
                ("a".into(), b"1".to_vec()),
                ("b".into(), b"2".to_vec()),
            ])
            .await
            .unwrap();

        let reopened = FileStore::open(&dir).unwrap();
        assert!(reopened.contains("a").await.unwrap());
        assert!(reopened.contains("b").await.unwrap());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
