//! # Repo Mentor - Commit-History Question Answering
//!
//! A RAG (Retrieval-Augmented Generation) engine that answers natural-language
//! questions about a git repository using its commit history as the knowledge
//! base.
//!
//! ## Overview
//!
//! Ingestion walks a repository's commits, generates one retrievable summary
//! chunk per commit, embeds the chunks, and stores a flat vector index.
//! Queries are answered by retrieving the most relevant commits (with an
//! exact shortcut for commit hashes and a recency re-ranker for "latest
//! changes" questions) and handing them to a chat model as context.
//!
//! ## Key Features
//!
//! - **Per-Commit Chunks**: One summary per commit, LLM-written with a
//!   deterministic fallback for noise commits and provider failures
//! - **Exact Hash Lookup**: Queries containing a commit hash bypass the
//!   vector search entirely
//! - **Recency Re-Ranking**: "Recent/latest" questions blend similarity with
//!   commit date
//! - **Incremental Ingestion**: Already-extracted commits are never reprocessed
//! - **Async Jobs**: Ingestion runs detached; progress is polled through
//!   persisted job records
//!
//! ## Modules
//!
//! - [`git`]: Commit extraction from local or remote repositories
//! - [`rag`]: Chunk generation, the flat vector index, and retrieval
//! - [`chat`]: Question answering over retrieved context
//! - [`ingest`]: The ingestion job state machine and pipeline orchestration
//! - [`llm`]: Embedding and chat provider traits plus the OpenAI-compatible client
//! - [`storage`]: Key-value object storage abstraction with a local backend
//! - [`config`]: Configuration management with environment variable support
//! - [`types`]: Commit records, chunks, retrieval results, and job records
//! - [`error`]: Error types
//!
//! ## Usage Example
//!
//! ```no_run
//! use repo_mentor::config::Config;
//! use repo_mentor::llm::OpenAiClient;
//! use repo_mentor::rag::Retriever;
//! use repo_mentor::storage::LocalStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::new();
//!     let store = Arc::new(LocalStore::new(&config.storage.root));
//!     let client = Arc::new(OpenAiClient::from_config(&config.llm)?);
//!
//!     let retriever = Retriever::new(store, client);
//!     let hits = retriever.retrieve("acme_widgets", "how does auth work?", 5).await?;
//!     for hit in hits {
//!         println!("{:.3} {}", hit.similarity, hit.id);
//!     }
//!     Ok(())
//! }
//! ```

/// Question answering over retrieved commit context
pub mod chat;

/// Configuration management with environment variable overrides
pub mod config;

/// Error types
pub mod error;

/// Commit extraction from git repositories
pub mod git;

/// Ingestion jobs and pipeline orchestration
pub mod ingest;

/// Embedding and chat provider traits, OpenAI-compatible client
pub mod llm;

/// Chunk generation, vector index, and retrieval
pub mod rag;

/// Object storage abstraction
pub mod storage;

/// Shared data types
pub mod types;
