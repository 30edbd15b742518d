//! Flat inner-product vector index and its builder
//!
//! Exact nearest-neighbor search over L2-normalized vectors; chunk counts per
//! repository are small, so no approximate structure is needed. Vector
//! position *i* always corresponds to chunk *i* in the chunk file — both are
//! produced from the same id-ordered sequence, and the retriever relies on
//! that alignment.

use crate::error::{PipelineError, StorageError};
use crate::llm::EmbeddingProvider;
use crate::rag::chunks::parse_chunks_jsonl;
use crate::storage::{keys, ObjectStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Dense matrix of normalized embedding vectors with exact inner-product search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dim: usize,
    /// Row-major, `len * dim` entries, rows L2-normalized
    data: Vec<f32>,
}

impl FlatIndex {
    /// Build an index from one vector per chunk, normalizing each row
    pub fn build(vectors: &[Vec<f32>]) -> Result<Self, String> {
        let Some(first) = vectors.first() else {
            return Err("cannot build an index from zero vectors".to_string());
        };
        let dim = first.len();
        if dim == 0 {
            return Err("embedding vectors have zero dimension".to_string());
        }

        let mut data = Vec::with_capacity(vectors.len() * dim);
        for (i, v) in vectors.iter().enumerate() {
            if v.len() != dim {
                return Err(format!(
                    "vector {} has dimension {}, expected {}",
                    i,
                    v.len(),
                    dim
                ));
            }
            let mut row = v.clone();
            l2_normalize(&mut row);
            data.extend_from_slice(&row);
        }

        Ok(Self { dim, data })
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Return up to `k` `(position, similarity)` pairs, most similar first
    ///
    /// Ties keep the lower position so results are deterministic.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if k == 0 || self.is_empty() || query.len() != self.dim {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .map(|i| {
                let row = &self.data[i * self.dim..(i + 1) * self.dim];
                let score = row.iter().zip(query).map(|(a, b)| a * b).sum::<f32>();
                (i, score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        bincode::serialize(self).map_err(|e| StorageError::DecodeFailed {
            key: "index".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn from_bytes(bytes: &[u8], key: &str) -> Result<Self, StorageError> {
        bincode::deserialize(bytes).map_err(|e| StorageError::DecodeFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Scale a vector to unit L2 norm; zero vectors are left unchanged
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Embeds a repository's chunk texts and persists the flat index artifact
pub struct IndexBuilder {
    store: Arc<dyn ObjectStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
}

impl IndexBuilder {
    pub fn new(store: Arc<dyn ObjectStore>, embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embeddings }
    }

    /// Build and store the index for `repo_id`; returns the number of vectors
    ///
    /// Zero chunks builds nothing: retrieval against a repository without an
    /// index fails with a distinct not-indexed error instead.
    pub async fn build(&self, repo_id: &str) -> Result<usize, PipelineError> {
        let chunks_key = keys::chunks(repo_id);
        let jsonl = self
            .store
            .read_text(&chunks_key)
            .await
            .map_err(|e| self.stage_error(repo_id, e))?;

        let Some(jsonl) = jsonl else {
            tracing::info!("No chunk file for '{}', skipping index build", repo_id);
            return Ok(0);
        };

        let chunks =
            parse_chunks_jsonl(&jsonl, &chunks_key).map_err(|e| self.stage_error(repo_id, e))?;
        if chunks.is_empty() {
            tracing::info!("Zero chunks for '{}', skipping index build", repo_id);
            return Ok(0);
        }

        // One batched call; the same id-ordered sequence as the chunk file
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embeddings
            .embed(&texts)
            .await
            .map_err(|e| self.stage_error(repo_id, e))?;

        if vectors.len() != chunks.len() {
            return Err(self.stage_error(
                repo_id,
                format!("{} vectors for {} chunks", vectors.len(), chunks.len()),
            ));
        }

        let index = FlatIndex::build(&vectors).map_err(|e| self.stage_error(repo_id, e))?;
        let bytes = index.to_bytes().map_err(|e| self.stage_error(repo_id, e))?;
        self.store
            .write_bytes(&keys::index(repo_id), &bytes)
            .await
            .map_err(|e| self.stage_error(repo_id, e))?;

        tracing::info!(
            "Built index for '{}': {} vectors of dimension {}",
            repo_id,
            index.len(),
            index.dim()
        );
        Ok(index.len())
    }

    fn stage_error(&self, repo_id: &str, e: impl std::fmt::Display) -> PipelineError {
        PipelineError::IndexBuildFailed {
            repo: repo_id.to_string(),
            reason: e.to_string(),
        }
    }
}
