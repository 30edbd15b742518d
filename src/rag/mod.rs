//! The retrieval-augmented lookup engine
//!
//! Commit records flow one way through this module: records become chunks
//! ([`chunks`]), chunk texts become vectors and a flat inner-product index
//! ([`index`]), and the [`retriever`] answers queries against the artifacts
//! the pipeline produced.

/// Per-commit chunk text generation and noise classification
pub mod extractor;

/// Chunk building over all commits of a repository
pub mod chunks;

/// Embedding and flat vector index construction
pub mod index;

/// Prompt text for summarization and chat
pub mod prompt;

/// Query-time retrieval with caching, hash shortcut, and recency re-ranking
pub mod retriever;

pub use chunks::ChunkBuilder;
pub use index::{FlatIndex, IndexBuilder};
pub use retriever::Retriever;
