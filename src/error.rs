/// Centralized error types for repo-mentor using thiserror
///
/// Callers branch on error kind, never on message text. `NotIndexed` in
/// particular is its own variant so the presentation layer can turn it into
/// a "please ingest first" message without string matching.
use thiserror::Error;

/// Main error type for the RAG system
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Repository '{0}' is not indexed. Ingest the repository first")]
    NotIndexed(String),

    #[error("Embedding provider error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Chat provider error: {0}")]
    Chat(#[from] ChatError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("{0}")]
    Other(String),
}

/// Errors raised by embedding providers
///
/// Each transport failure mode is distinguishable. None of these are retried
/// by the retriever; retry policy lives inside the provider.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding request was rate limited")]
    RateLimited,

    #[error("Embedding request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Failed to reach embedding provider: {0}")]
    Connection(String),

    #[error("Embedding provider returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Embedding provider returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Embedding provider returned an empty response")]
    EmptyResponse,
}

/// Errors raised by the chat/summarization provider
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Chat request was rate limited")]
    RateLimited,

    #[error("Chat request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Failed to reach chat provider: {0}")]
    Connection(String),

    #[error("Chat provider returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Chat provider returned no completion")]
    EmptyResponse,

    #[error("Failed to decode streaming response: {0}")]
    StreamDecode(String),
}

/// Errors related to input validation
///
/// Rejected before any I/O is performed.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("{0} is required and cannot be empty")]
    Empty(&'static str),

    #[error("top_k must be between {min} and {max}, got {actual}")]
    TopKOutOfRange { min: usize, max: usize, actual: usize },

    #[error("Invalid repository URL: {0}")]
    InvalidRepoUrl(String),
}

/// Errors related to object storage
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Failed to read '{key}': {source}")]
    ReadFailed {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write '{key}': {source}")]
    WriteFailed {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list objects under '{prefix}': {source}")]
    ListFailed {
        prefix: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode '{key}': {reason}")]
    DecodeFailed { key: String, reason: String },
}

/// Errors raised by ingestion pipeline stages
///
/// A stage failure terminates the job; the orchestrator stores the error
/// text on the job record and never propagates a panic.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Commit extraction failed for '{repo}': {reason}")]
    ExtractFailed { repo: String, reason: String },

    #[error("Chunk build failed for '{repo}': {reason}")]
    ChunkBuildFailed { repo: String, reason: String },

    #[error("Index build failed for '{repo}': {reason}")]
    IndexBuildFailed { repo: String, reason: String },
}

impl From<anyhow::Error> for RagError {
    fn from(err: anyhow::Error) -> Self {
        RagError::Other(format!("{:#}", err))
    }
}

impl RagError {
    /// Create a new error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        RagError::Other(msg.into())
    }

    /// True for errors caused by caller input rather than the system
    pub fn is_user_error(&self) -> bool {
        matches!(self, RagError::Validation(_) | RagError::NotIndexed(_))
    }
}
