//! Query-time retrieval over a repository's chunk and index artifacts
//!
//! Lookup order: input validation, cached (or single-flight loaded) repo
//! artifacts, exact commit-hash shortcut, then semantic search with optional
//! recency re-ranking.

use crate::error::{EmbeddingError, RagError, StorageError, ValidationError};
use crate::llm::EmbeddingProvider;
use crate::rag::chunks::parse_chunks_jsonl;
use crate::rag::index::{l2_normalize, FlatIndex};
use crate::storage::{keys, ObjectStore};
use crate::types::{Chunk, RetrievalResult};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

pub const TOP_K_MIN: usize = 1;
pub const TOP_K_MAX: usize = 20;

/// Phrases that mark a query as asking about the most recent changes
const RECENCY_KEYWORDS: [&str; 11] = [
    "recent",
    "latest",
    "last",
    "new",
    "newest",
    "current",
    "updated",
    "what changed",
    "what's new",
    "what are the changes",
    "what updates",
];

const SIMILARITY_WEIGHT: f32 = 0.7;
const RECENCY_WEIGHT: f32 = 0.3;

/// How many candidates to pull from the index when re-ranking by recency
const RECENCY_WIDTH_FACTOR: usize = 3;

/// A repository's loaded artifacts: index plus the aligned chunk sequence
struct LoadedRepo {
    index: FlatIndex,
    chunks: Vec<Chunk>,
}

/// Process-lifetime cache of loaded repositories
///
/// First load per repository is a critical section: concurrent requests for
/// the same repo share one load through a per-key `OnceCell`, while
/// steady-state reads only clone an `Arc`. A failed load is not cached, so
/// the next request retries.
pub struct RepoCache {
    cells: Mutex<HashMap<String, Arc<OnceCell<Arc<LoadedRepo>>>>>,
}

impl RepoCache {
    pub fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    async fn cell(&self, repo_id: &str) -> Arc<OnceCell<Arc<LoadedRepo>>> {
        let mut cells = self.cells.lock().await;
        cells
            .entry(repo_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Drop a repository's cached artifacts (e.g. after re-ingestion)
    pub async fn invalidate(&self, repo_id: &str) {
        self.cells.lock().await.remove(repo_id);
    }
}

impl Default for RepoCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Answers queries with a ranked list of chunks
pub struct Retriever {
    store: Arc<dyn ObjectStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    cache: RepoCache,
    chunk_id_pattern: Regex,
    full_hash_pattern: Regex,
    short_hash_pattern: Regex,
}

impl Retriever {
    pub fn new(store: Arc<dyn ObjectStore>, embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embeddings,
            cache: RepoCache::new(),
            // Tested in order of specificity; unwraps are on literal patterns
            chunk_id_pattern: Regex::new(r"\d{14}_[a-f0-9]{40}").unwrap(),
            full_hash_pattern: Regex::new(r"[a-f0-9]{40}").unwrap(),
            short_hash_pattern: Regex::new(r"[a-f0-9]{7,39}").unwrap(),
        }
    }

    pub fn cache(&self) -> &RepoCache {
        &self.cache
    }

    /// Retrieve up to `top_k` chunks relevant to `query`
    pub async fn retrieve(
        &self,
        repo_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        if repo_id.trim().is_empty() {
            return Err(ValidationError::Empty("repo_id").into());
        }
        if query.trim().is_empty() {
            return Err(ValidationError::Empty("query").into());
        }
        if !(TOP_K_MIN..=TOP_K_MAX).contains(&top_k) {
            return Err(ValidationError::TopKOutOfRange {
                min: TOP_K_MIN,
                max: TOP_K_MAX,
                actual: top_k,
            }
            .into());
        }

        let repo = self.load(repo_id).await?;
        if repo.chunks.is_empty() {
            return Ok(Vec::new());
        }

        // Exact-match shortcut: a commit id in the query bypasses semantic
        // search entirely. A candidate that matches nothing falls through —
        // it may just be a hex-looking word.
        if let Some(candidate) = self.extract_commit_id(query) {
            tracing::debug!("Commit id candidate in query: {}", candidate);
            let matches = exact_matches(&repo.chunks, &candidate);
            if !matches.is_empty() {
                return Ok(matches.into_iter().take(top_k).collect());
            }
        }

        let query_texts = [query.to_string()];
        let query_vectors = self
            .embeddings
            .embed(&query_texts)
            .await
            .map_err(RagError::Embedding)?;
        let mut query_vector = query_vectors
            .into_iter()
            .next()
            .ok_or(RagError::Embedding(EmbeddingError::EmptyResponse))?;
        l2_normalize(&mut query_vector);

        let is_recency = is_recency_query(query);
        let width = if is_recency {
            top_k.saturating_mul(RECENCY_WIDTH_FACTOR)
        } else {
            top_k
        }
        .min(repo.chunks.len());

        let hits = repo.index.search(&query_vector, width);

        let mut candidates: Vec<Candidate> = hits
            .into_iter()
            .filter(|(pos, _)| *pos < repo.chunks.len())
            .map(|(pos, similarity)| Candidate {
                position: pos,
                similarity,
                date_key: date_key_from_chunk_id(&repo.chunks[pos].id),
            })
            .collect();

        if is_recency && !candidates.is_empty() {
            rerank_by_recency(&mut candidates);
        }
        candidates.truncate(top_k);

        Ok(candidates
            .into_iter()
            .map(|c| {
                let chunk = &repo.chunks[c.position];
                RetrievalResult {
                    id: chunk.id.clone(),
                    text: chunk.text.clone(),
                    similarity: c.similarity,
                }
            })
            .collect())
    }

    /// Load artifacts from the cache, or from storage exactly once per repo
    async fn load(&self, repo_id: &str) -> Result<Arc<LoadedRepo>, RagError> {
        let cell = self.cache.cell(repo_id).await;
        let loaded = cell
            .get_or_try_init(|| self.load_from_store(repo_id))
            .await?;
        Ok(Arc::clone(loaded))
    }

    async fn load_from_store(&self, repo_id: &str) -> Result<Arc<LoadedRepo>, RagError> {
        let index_key = keys::index(repo_id);
        let index_bytes = match self.store.read_bytes(&index_key).await {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => {
                return Err(RagError::NotIndexed(repo_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let index = FlatIndex::from_bytes(&index_bytes, &index_key)?;

        let chunks_key = keys::chunks(repo_id);
        let jsonl = self
            .store
            .read_text(&chunks_key)
            .await?
            .ok_or_else(|| RagError::NotIndexed(repo_id.to_string()))?;
        let chunks = parse_chunks_jsonl(&jsonl, &chunks_key)?;

        tracing::info!(
            "Loaded '{}' into retrieval cache: {} chunks, {} vectors",
            repo_id,
            chunks.len(),
            index.len()
        );
        Ok(Arc::new(LoadedRepo { index, chunks }))
    }

    /// Pull a commit id candidate out of free-form query text
    fn extract_commit_id(&self, query: &str) -> Option<String> {
        for pattern in [
            &self.chunk_id_pattern,
            &self.full_hash_pattern,
            &self.short_hash_pattern,
        ] {
            if let Some(m) = pattern.find(query) {
                return Some(m.as_str().to_string());
            }
        }
        None
    }
}

struct Candidate {
    position: usize,
    similarity: f32,
    date_key: i64,
}

/// Chunks whose id matches a commit id candidate, each with similarity 1.0
///
/// A short hash must be a prefix of the id's hash part; matching arbitrary
/// substrings would let a short candidate hit an unrelated commit whose hash
/// merely contains it.
fn exact_matches(chunks: &[Chunk], candidate: &str) -> Vec<RetrievalResult> {
    chunks
        .iter()
        .filter(|chunk| chunk_id_matches(&chunk.id, candidate))
        .map(|chunk| RetrievalResult {
            id: chunk.id.clone(),
            text: chunk.text.clone(),
            similarity: 1.0,
        })
        .collect()
}

fn chunk_id_matches(chunk_id: &str, candidate: &str) -> bool {
    if chunk_id == candidate {
        return true;
    }
    match chunk_id.split_once('_') {
        Some((_, hash)) => hash.starts_with(candidate),
        None => false,
    }
}

/// True when the query's phrasing asks about recent changes
fn is_recency_query(query: &str) -> bool {
    let lowered = query.to_lowercase();
    RECENCY_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Numeric date prefix of a chunk id, 0 when unparseable
fn date_key_from_chunk_id(chunk_id: &str) -> i64 {
    chunk_id
        .split('_')
        .next()
        .and_then(|prefix| prefix.parse::<i64>().ok())
        .unwrap_or(0)
}

/// Blend similarity with min-max-normalized recency and sort best first
fn rerank_by_recency(candidates: &mut [Candidate]) {
    let max_date = candidates.iter().map(|c| c.date_key).max().unwrap_or(0);
    let min_date = candidates.iter().map(|c| c.date_key).min().unwrap_or(0);
    let range = max_date - min_date;

    let combined = |c: &Candidate| {
        let recency = if range > 0 {
            (c.date_key - min_date) as f32 / range as f32
        } else {
            0.0
        };
        SIMILARITY_WEIGHT * c.similarity + RECENCY_WEIGHT * recency
    };

    candidates.sort_by(|a, b| {
        combined(b)
            .partial_cmp(&combined(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::chunks::render_chunks_jsonl;
    use crate::storage::LocalStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Embeddings keyed on known marker words; panics-by-error on unexpected
    /// calls so tests can assert the semantic path was skipped
    struct MarkerEmbeddings {
        calls: AtomicUsize,
    }

    impl MarkerEmbeddings {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn direction(text: &str) -> Vec<f32> {
            if text.contains("parser") {
                vec![1.0, 0.0, 0.0]
            } else if text.contains("auth") {
                vec![0.0, 1.0, 0.0]
            } else {
                vec![0.0, 0.0, 1.0]
            }
        }
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for MarkerEmbeddings {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| Self::direction(t)).collect())
        }
    }

    struct FailingEmbeddings;

    #[async_trait::async_trait]
    impl EmbeddingProvider for FailingEmbeddings {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::RateLimited)
        }
    }

    fn hash(c: char) -> String {
        c.to_string().repeat(40)
    }

    fn chunk(date: &str, hash_char: char, text: &str) -> Chunk {
        Chunk {
            id: format!("{}_{}", date, hash(hash_char)),
            text: text.to_string(),
        }
    }

    async fn seed_repo(store: &LocalStore, repo_id: &str, chunks: &[Chunk]) {
        let embeddings = MarkerEmbeddings::new();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embeddings.embed(&texts).await.unwrap();
        let index = FlatIndex::build(&vectors).unwrap();

        store
            .write_bytes(&keys::index(repo_id), &index.to_bytes().unwrap())
            .await
            .unwrap();
        store
            .write_text(&keys::chunks(repo_id), &render_chunks_jsonl(chunks).unwrap())
            .await
            .unwrap();
    }

    fn default_chunks() -> Vec<Chunk> {
        vec![
            chunk("20240101120000", 'a', "Added a parser module"),
            chunk("20240301120000", 'b', "Reworked auth middleware"),
            chunk("20240601120000", 'c', "Bumped dependency versions"),
        ]
    }

    async fn retriever_over(chunks: &[Chunk]) -> (tempfile::TempDir, Retriever) {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));
        seed_repo(&store, "r", chunks).await;
        let retriever = Retriever::new(store, Arc::new(MarkerEmbeddings::new()));
        (dir, retriever)
    }

    #[tokio::test]
    async fn test_validation_rejected_before_io() {
        // No repo seeded: validation must fire before any storage access
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));
        let retriever = Retriever::new(store, Arc::new(FailingEmbeddings));

        let err = retriever.retrieve("", "query", 5).await.unwrap_err();
        assert!(matches!(err, RagError::Validation(ValidationError::Empty("repo_id"))));

        let err = retriever.retrieve("r", "   ", 5).await.unwrap_err();
        assert!(matches!(err, RagError::Validation(ValidationError::Empty("query"))));

        let err = retriever.retrieve("r", "query", 0).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::Validation(ValidationError::TopKOutOfRange { actual: 0, .. })
        ));

        let err = retriever.retrieve("r", "query", 21).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::Validation(ValidationError::TopKOutOfRange { actual: 21, .. })
        ));
    }

    #[tokio::test]
    async fn test_not_indexed_is_distinct_error() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));
        let retriever = Retriever::new(store, Arc::new(MarkerEmbeddings::new()));

        let err = retriever.retrieve("missing", "query", 5).await.unwrap_err();
        assert!(matches!(err, RagError::NotIndexed(ref id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_semantic_search_ranks_by_similarity() {
        let (_dir, retriever) = retriever_over(&default_chunks()).await;
        let results = retriever.retrieve("r", "how does the parser work", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].text.contains("parser"));
        assert!(results[0].similarity > results[1].similarity);
    }

    #[tokio::test]
    async fn test_top_k_larger_than_chunk_count() {
        let chunks = default_chunks()[..2].to_vec();
        let (_dir, retriever) = retriever_over(&chunks).await;
        let results = retriever.retrieve("r", "anything interesting", 5).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_exact_match_full_hash_skips_semantic_search() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));
        seed_repo(&store, "r", &default_chunks()).await;
        let embeddings = Arc::new(MarkerEmbeddings::new());
        let retriever = Retriever::new(store, embeddings.clone());

        let query = format!("what is commit {}", hash('b'));
        let results = retriever.retrieve("r", &query, 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].id.ends_with(&hash('b')));
        assert_eq!(results[0].similarity, 1.0);
        // No embedding call on the exact-match path
        assert_eq!(embeddings.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exact_match_short_hash_prefix() {
        let (_dir, retriever) = retriever_over(&default_chunks()).await;
        let results = retriever.retrieve("r", "show me aaaaaaa please", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].id.ends_with(&hash('a')));
        assert_eq!(results[0].similarity, 1.0);
    }

    #[tokio::test]
    async fn test_exact_match_full_chunk_id() {
        let (_dir, retriever) = retriever_over(&default_chunks()).await;
        let id = format!("20240301120000_{}", hash('b'));
        let results = retriever.retrieve("r", &id, 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
    }

    #[tokio::test]
    async fn test_unmatched_candidate_falls_through_to_semantic() {
        let (_dir, retriever) = retriever_over(&default_chunks()).await;
        // Hex-looking word matching no chunk id
        let results = retriever.retrieve("r", "decaffed parser question", 3).await.unwrap();
        assert!(!results.is_empty());
        assert!(results[0].similarity < 1.0);
    }

    #[tokio::test]
    async fn test_recency_query_prefers_newer_commits() {
        // All three texts are equally unrelated to the query direction, so
        // similarity is flat and recency decides the order
        let chunks = vec![
            chunk("20240101120000", 'a', "Tweaked build scripts"),
            chunk("20240301120000", 'b', "Tweaked build scripts again"),
            chunk("20240601120000", 'c', "Tweaked build scripts once more"),
        ];
        let (_dir, retriever) = retriever_over(&chunks).await;

        let results = retriever.retrieve("r", "what changed recently?", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].id.starts_with("20240601120000"));
        assert!(results[1].id.starts_with("20240301120000"));
    }

    #[tokio::test]
    async fn test_embedding_failure_is_fatal_and_typed() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));
        seed_repo(&store, "r", &default_chunks()).await;
        let retriever = Retriever::new(store, Arc::new(FailingEmbeddings));

        let err = retriever.retrieve("r", "tell me about parsing", 5).await.unwrap_err();
        assert!(matches!(err, RagError::Embedding(EmbeddingError::RateLimited)));
    }

    #[tokio::test]
    async fn test_empty_chunk_file_returns_empty_results() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));
        // Index exists but the chunk file is empty
        let index = FlatIndex::build(&[vec![1.0, 0.0, 0.0]]).unwrap();
        store
            .write_bytes(&keys::index("r"), &index.to_bytes().unwrap())
            .await
            .unwrap();
        store.write_text(&keys::chunks("r"), "").await.unwrap();

        let retriever = Retriever::new(store, Arc::new(MarkerEmbeddings::new()));
        let results = retriever.retrieve("r", "anything", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_cache_loads_once() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));
        seed_repo(&store, "r", &default_chunks()).await;
        let retriever = Arc::new(Retriever::new(store.clone(), Arc::new(MarkerEmbeddings::new())));

        retriever.retrieve("r", "parser details", 3).await.unwrap();

        // Corrupt the stored artifacts; cached retrieval must still work
        store.write_text(&keys::chunks("r"), "{broken").await.unwrap();
        let results = retriever.retrieve("r", "parser details", 3).await.unwrap();
        assert!(!results.is_empty());

        // After invalidation the corrupt file surfaces as a storage error
        retriever.cache().invalidate("r").await;
        let err = retriever.retrieve("r", "parser details", 3).await.unwrap_err();
        assert!(matches!(err, RagError::Storage(_)));
    }

    #[tokio::test]
    async fn test_single_flight_under_concurrency() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStore::new(dir.path()));
        seed_repo(&store, "r", &default_chunks()).await;
        let retriever = Arc::new(Retriever::new(store, Arc::new(MarkerEmbeddings::new())));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let r = Arc::clone(&retriever);
            handles.push(tokio::spawn(async move {
                r.retrieve("r", "auth middleware history", 3).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
    }

    #[test]
    fn test_recency_keywords() {
        assert!(is_recency_query("What's new in the repo?"));
        assert!(is_recency_query("LATEST changes please"));
        assert!(!is_recency_query("how does parsing work"));
    }

    #[test]
    fn test_date_key_parse_failure_is_zero() {
        assert_eq!(date_key_from_chunk_id("garbage_abc"), 0);
        assert_eq!(date_key_from_chunk_id("20240101120000_abc"), 20240101120000);
    }

    #[test]
    fn test_rerank_combined_scores() {
        // Similarities [0.9, 0.85, 0.5] with recencies [0.0, 1.0, 0.5]
        // blend to [0.63, 0.895, 0.5]; the middle candidate wins
        let mut candidates = vec![
            Candidate { position: 0, similarity: 0.9, date_key: 0 },
            Candidate { position: 1, similarity: 0.85, date_key: 100 },
            Candidate { position: 2, similarity: 0.5, date_key: 50 },
        ];
        rerank_by_recency(&mut candidates);
        assert_eq!(candidates[0].position, 1);
        assert_eq!(candidates[1].position, 0);
        assert_eq!(candidates[2].position, 2);
    }

    #[test]
    fn test_rerank_uniform_dates_keeps_similarity_order() {
        let mut candidates = vec![
            Candidate { position: 0, similarity: 0.9, date_key: 7 },
            Candidate { position: 1, similarity: 0.5, date_key: 7 },
        ];
        rerank_by_recency(&mut candidates);
        assert_eq!(candidates[0].position, 0);
    }

    #[test]
    fn test_chunk_id_matching_rules() {
        let id = "20240101120000_abcdef0123456789abcdef0123456789abcdef01";
        assert!(chunk_id_matches(id, id));
        assert!(chunk_id_matches(id, "abcdef0123456789abcdef0123456789abcdef01"));
        assert!(chunk_id_matches(id, "abcdef0"));
        // Mid-hash substrings do not match
        assert!(!chunk_id_matches(id, "123456789abc"));
        assert!(!chunk_id_matches(id, "fffffff"));
    }
}
