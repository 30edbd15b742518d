//! Chat over a repository's commit history
//!
//! Retrieval results are formatted into the system prompt as numbered
//! documents; the answer either comes back whole or as a token stream.

use crate::error::RagError;
use crate::llm::{ChatMessage, ChatProvider, TokenStream};
use crate::rag::prompt::build_chat_prompt;
use crate::rag::Retriever;
use crate::types::RetrievalResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const CHAT_TEMPERATURE: f32 = 0.5;
const CHAT_MAX_TOKENS: u32 = 250;

/// Chunk texts echoed back to the caller are truncated to this many characters
const CHUNK_PREVIEW_CHARS: usize = 200;

/// One context chunk as reported back with an answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRef {
    pub id: String,
    pub similarity: f32,
    /// Chunk text, truncated with a trailing ellipsis when long
    pub text: String,
}

/// A complete answer with the context that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: String,
    pub retrieved_chunks: Vec<ChunkRef>,
}

pub struct ChatService {
    retriever: Arc<Retriever>,
    chat: Arc<dyn ChatProvider>,
    model: String,
}

impl ChatService {
    pub fn new(retriever: Arc<Retriever>, chat: Arc<dyn ChatProvider>, model: impl Into<String>) -> Self {
        Self {
            retriever,
            chat,
            model: model.into(),
        }
    }

    /// Answer a question about a repository in one round trip
    pub async fn chat_with_repo(
        &self,
        repo_id: &str,
        user_message: &str,
        top_k: usize,
    ) -> Result<ChatReply, RagError> {
        let retrieved = self.retriever.retrieve(repo_id, user_message, top_k).await?;
        let messages = build_messages(&retrieved, user_message);

        let message = self
            .chat
            .complete(&messages, &self.model, CHAT_TEMPERATURE, CHAT_MAX_TOKENS)
            .await?;

        Ok(ChatReply {
            message,
            retrieved_chunks: chunk_refs(&retrieved),
        })
    }

    /// Streaming variant: the context chunks are available up front, the
    /// answer arrives token by token
    pub async fn chat_with_repo_stream(
        &self,
        repo_id: &str,
        user_message: &str,
        top_k: usize,
    ) -> Result<(Vec<ChunkRef>, TokenStream), RagError> {
        let retrieved = self.retriever.retrieve(repo_id, user_message, top_k).await?;
        let messages = build_messages(&retrieved, user_message);

        let stream = self
            .chat
            .complete_stream(&messages, &self.model, CHAT_TEMPERATURE, CHAT_MAX_TOKENS)
            .await?;

        Ok((chunk_refs(&retrieved), stream))
    }
}

fn build_messages(retrieved: &[RetrievalResult], user_message: &str) -> Vec<ChatMessage> {
    let context = format_context(retrieved);
    vec![
        ChatMessage::system(build_chat_prompt(&context)),
        ChatMessage::user(user_message),
    ]
}

/// Render retrieval results as numbered documents separated by rules
pub fn format_context(retrieved: &[RetrievalResult]) -> String {
    if retrieved.is_empty() {
        return "No specific context information retrieved for this query.".to_string();
    }

    retrieved
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "[Document {}] (Similarity: {:.3})\n{}\n",
                i + 1,
                chunk.similarity,
                chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n\n")
}

fn chunk_refs(retrieved: &[RetrievalResult]) -> Vec<ChunkRef> {
    retrieved
        .iter()
        .map(|chunk| ChunkRef {
            id: chunk.id.clone(),
            similarity: chunk.similarity,
            text: preview(&chunk.text),
        })
        .collect()
}

fn preview(text: &str) -> String {
    if text.chars().count() <= CHUNK_PREVIEW_CHARS {
        return text.to_string();
    }
    let truncated: String = text.chars().take(CHUNK_PREVIEW_CHARS).collect();
    format!("{}...", truncated)
}
