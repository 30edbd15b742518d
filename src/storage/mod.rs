//! Object storage boundary for commit records, chunk files, index artifacts,
//! and job records
//!
//! The pipeline and retriever only ever talk to [`ObjectStore`]; the shipped
//! implementation is [`LocalStore`], a filesystem tree rooted at a configured
//! directory. Writes are whole-object overwrites, last write wins.

mod local;

pub use local::LocalStore;

use crate::error::StorageError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Abstract key/value object store
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read a UTF-8 object, `None` if the key does not exist
    async fn read_text(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Read a binary object; a missing key is a distinct `NotFound` error
    async fn read_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Write a UTF-8 object, creating parent prefixes as needed
    async fn write_text(&self, key: &str, data: &str) -> Result<(), StorageError>;

    /// Write a binary object, creating parent prefixes as needed
    async fn write_bytes(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// List stems (file names without `.json`) of JSON objects under a prefix
    ///
    /// A prefix with no objects yields an empty list, not an error.
    async fn list_stems(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Read and deserialize a JSON object, `None` if the key does not exist
pub async fn read_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.read_text(key).await? {
        None => Ok(None),
        Some(text) => {
            let value = serde_json::from_str(&text).map_err(|e| StorageError::DecodeFailed {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
            Ok(Some(value))
        }
    }
}

/// Serialize and write a JSON object
pub async fn write_json<T: Serialize>(
    store: &dyn ObjectStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let text = serde_json::to_string(value).map_err(|e| StorageError::DecodeFailed {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    store.write_text(key, &text).await
}

/// Key layout shared by the pipeline and the retriever
pub mod keys {
    /// Prefix holding one JSON record per commit
    pub fn commits_prefix(repo_id: &str) -> String {
        format!("repos/{}/commits/", repo_id)
    }

    /// Record for a single commit id (`<date>_<hash>`)
    pub fn commit(repo_id: &str, commit_id: &str) -> String {
        format!("repos/{}/commits/{}.json", repo_id, commit_id)
    }

    /// Newline-delimited JSON chunk file for a repository
    pub fn chunks(repo_id: &str) -> String {
        format!("repos/{}/rag/chunks.jsonl", repo_id)
    }

    /// Serialized vector index for a repository
    pub fn index(repo_id: &str) -> String {
        format!("repos/{}/rag/index.faiss", repo_id)
    }

    /// Prefix holding one JSON record per ingestion job
    pub fn jobs_prefix(repo_id: &str) -> String {
        format!("repos/{}/jobs/", repo_id)
    }

    /// Record for a single ingestion job
    pub fn job(repo_id: &str, job_id: &str) -> String {
        format!("repos/{}/jobs/{}.json", repo_id, job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(
            keys::commit("acme_widgets", "20240101120000_abc"),
            "repos/acme_widgets/commits/20240101120000_abc.json"
        );
        assert_eq!(keys::chunks("acme_widgets"), "repos/acme_widgets/rag/chunks.jsonl");
        assert_eq!(keys::index("acme_widgets"), "repos/acme_widgets/rag/index.faiss");
        assert_eq!(
            keys::job("acme_widgets", "j-1"),
            "repos/acme_widgets/jobs/j-1.json"
        );
    }
}
