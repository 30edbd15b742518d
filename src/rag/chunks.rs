//! Chunk building: one retrievable chunk per commit of a repository
//!
//! Chunk texts are generated concurrently through a bounded worker pool, but
//! the persisted file is always in sort-by-id order, so completion order
//! never leaks into the output.

use crate::error::{PipelineError, StorageError};
use crate::llm::CommitSummarizer;
use crate::rag::extractor::generate_chunk_text;
use crate::storage::{keys, read_json, ObjectStore};
use crate::types::{Chunk, CommitRecord};
use futures::stream::{self, StreamExt};
use std::sync::Arc;

/// Builds the newline-delimited chunk file for a repository
pub struct ChunkBuilder {
    store: Arc<dyn ObjectStore>,
    summarizer: Arc<dyn CommitSummarizer>,
    workers: usize,
}

impl ChunkBuilder {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        summarizer: Arc<dyn CommitSummarizer>,
        workers: usize,
    ) -> Self {
        Self {
            store,
            summarizer,
            workers: workers.max(1),
        }
    }

    /// Generate chunk texts for every commit record of `repo_id` and write
    /// the sorted chunk file; returns the number of chunks written
    ///
    /// An unreadable commit record is skipped. Zero commits still writes an
    /// empty chunk file.
    pub async fn build(&self, repo_id: &str) -> Result<usize, PipelineError> {
        let prefix = keys::commits_prefix(repo_id);
        let stems = self
            .store
            .list_stems(&prefix)
            .await
            .map_err(|e| self.stage_error(repo_id, e))?;

        tracing::info!("Building chunks for {} commits of '{}'", stems.len(), repo_id);

        let results = stream::iter(stems)
            .map(|stem| {
                let store = Arc::clone(&self.store);
                let summarizer = Arc::clone(&self.summarizer);
                let key = keys::commit(repo_id, &stem);
                async move {
                    let record: Option<CommitRecord> = match read_json(store.as_ref(), &key).await {
                        Ok(record) => record,
                        Err(e) => {
                            tracing::warn!("Skipping unreadable commit record '{}': {}", key, e);
                            None
                        }
                    };
                    match record {
                        Some(record) => {
                            let text = generate_chunk_text(&record, summarizer.as_ref()).await;
                            Some(Chunk { id: stem, text })
                        }
                        None => None,
                    }
                }
            })
            .buffer_unordered(self.workers)
            .collect::<Vec<_>>()
            .await;

        let mut chunks: Vec<Chunk> = results.into_iter().flatten().collect();
        chunks.sort_by(|a, b| a.id.cmp(&b.id));

        let jsonl = render_chunks_jsonl(&chunks).map_err(|e| self.stage_error(repo_id, e))?;
        self.store
            .write_text(&keys::chunks(repo_id), &jsonl)
            .await
            .map_err(|e| self.stage_error(repo_id, e))?;

        tracing::info!("Wrote {} chunks for '{}'", chunks.len(), repo_id);
        Ok(chunks.len())
    }

    fn stage_error(&self, repo_id: &str, e: impl std::fmt::Display) -> PipelineError {
        PipelineError::ChunkBuildFailed {
            repo: repo_id.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Render chunks as newline-delimited JSON, one object per line, with a
/// trailing newline iff there is at least one chunk
pub fn render_chunks_jsonl(chunks: &[Chunk]) -> Result<String, StorageError> {
    let mut out = String::new();
    for chunk in chunks {
        let line = serde_json::to_string(chunk).map_err(|e| StorageError::DecodeFailed {
            key: "chunks.jsonl".to_string(),
            reason: e.to_string(),
        })?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

/// Parse a newline-delimited chunk file, skipping blank lines
pub fn parse_chunks_jsonl(text: &str, key: &str) -> Result<Vec<Chunk>, StorageError> {
    let mut chunks = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let chunk: Chunk = serde_json::from_str(line).map_err(|e| StorageError::DecodeFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        chunks.push(chunk);
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use crate::storage::{write_json, LocalStore};
    use crate::types::{CommitStats, FileChange};
    use tempfile::tempdir;

    struct EchoSummarizer;

    #[async_trait::async_trait]
    impl CommitSummarizer for EchoSummarizer {
        async fn summarize(&self, payload: &serde_json::Value) -> Result<String, ChatError> {
            Ok(format!("summary of {}", payload["commit"]["hash"]))
        }
    }

    fn commit(hash_char: char) -> CommitRecord {
        CommitRecord {
            committer_date: "2024-01-01T00:00:00+00:00".to_string(),
            hash: hash_char.to_string().repeat(40),
            msg: "add feature".to_string(),
            stats: CommitStats {
                files: 1,
                insertions: 100,
                deletions: 0,
            },
            files: vec![FileChange {
                new_path: Some("src/main.rs".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn commit_id(date: &str, hash_char: char) -> String {
        format!("{}_{}", date, hash_char.to_string().repeat(40))
    }

    async fn seed_commit(store: &LocalStore, repo: &str, id: &str, record: &CommitRecord) {
        write_json(store, &keys::commit(repo, id), record).await.unwrap();
    }

    #[tokio::test]
    async fn test_build_writes_sorted_chunks() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));

        // Seed out of chronological order
        let newer = commit_id("20240601000000", 'b');
        let older = commit_id("20240101000000", 'a');
        seed_commit(&store, "r", &newer, &commit('b')).await;
        seed_commit(&store, "r", &older, &commit('a')).await;

        let builder = ChunkBuilder::new(store.clone(), Arc::new(EchoSummarizer), 10);
        let count = builder.build("r").await.unwrap();
        assert_eq!(count, 2);

        let jsonl = store.read_text(&keys::chunks("r")).await.unwrap().unwrap();
        let chunks = parse_chunks_jsonl(&jsonl, "chunks.jsonl").unwrap();
        assert_eq!(chunks[0].id, older);
        assert_eq!(chunks[1].id, newer);
        assert!(jsonl.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_build_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));
        seed_commit(&store, "r", &commit_id("20240101000000", 'a'), &commit('a')).await;
        seed_commit(&store, "r", &commit_id("20240201000000", 'b'), &commit('b')).await;

        let builder = ChunkBuilder::new(store.clone(), Arc::new(EchoSummarizer), 3);
        builder.build("r").await.unwrap();
        let first = store.read_text(&keys::chunks("r")).await.unwrap().unwrap();

        builder.build("r").await.unwrap();
        let second = store.read_text(&keys::chunks("r")).await.unwrap().unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_commit_set_writes_empty_file() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));

        let builder = ChunkBuilder::new(store.clone(), Arc::new(EchoSummarizer), 10);
        let count = builder.build("empty").await.unwrap();
        assert_eq!(count, 0);

        // File exists and is empty, not absent
        let jsonl = store.read_text(&keys::chunks("empty")).await.unwrap();
        assert_eq!(jsonl.unwrap(), "");
    }

    #[tokio::test]
    async fn test_unreadable_record_is_skipped() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));
        let good = commit_id("20240101000000", 'a');
        seed_commit(&store, "r", &good, &commit('a')).await;
        store
            .write_text(&keys::commit("r", "20240201000000_bad"), "not json")
            .await
            .unwrap();

        let builder = ChunkBuilder::new(store.clone(), Arc::new(EchoSummarizer), 10);
        let count = builder.build("r").await.unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_render_empty_has_no_trailing_newline() {
        assert_eq!(render_chunks_jsonl(&[]).unwrap(), "");
    }

    #[test]
    fn test_parse_skips_blank_lines() {
        let text = "{\"id\":\"a\",\"text\":\"t\"}\n\n{\"id\":\"b\",\"text\":\"u\"}\n";
        let chunks = parse_chunks_jsonl(text, "k").unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].id, "b");
    }

    #[test]
    fn test_parse_rejects_bad_json() {
        assert!(parse_chunks_jsonl("{broken", "k").is_err());
    }
}
