use super::ObjectStore;
use crate::error::StorageError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Filesystem-backed object store
///
/// Keys map directly onto paths under the root directory. Parent directories
/// are created on write.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    async fn ensure_parent(&self, path: &Path, key: &str) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::WriteFailed {
                    key: key.to_string(),
                    source: e,
                })?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ObjectStore for LocalStore {
    async fn read_text(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.resolve(key)).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadFailed {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    async fn read_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        match fs::read(self.resolve(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::ReadFailed {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    async fn write_text(&self, key: &str, data: &str) -> Result<(), StorageError> {
        let path = self.resolve(key);
        self.ensure_parent(&path, key).await?;
        fs::write(&path, data)
            .await
            .map_err(|e| StorageError::WriteFailed {
                key: key.to_string(),
                source: e,
            })
    }

    async fn write_bytes(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(key);
        self.ensure_parent(&path, key).await?;
        fs::write(&path, data)
            .await
            .map_err(|e| StorageError::WriteFailed {
                key: key.to_string(),
                source: e,
            })
    }

    async fn list_stems(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.resolve(prefix);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StorageError::ListFailed {
                    prefix: prefix.to_string(),
                    source: e,
                })
            }
        };

        let mut stems = Vec::new();
        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::ListFailed {
                    prefix: prefix.to_string(),
                    source: e,
                })?;
            let Some(entry) = entry else { break };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                stems.push(stem.to_string());
            }
        }

        stems.sort();
        Ok(stems)
    }
}
