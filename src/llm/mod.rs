//! LLM collaborator traits and the OpenAI-compatible client
//!
//! The pipeline and retriever depend only on [`EmbeddingProvider`],
//! [`ChatProvider`], and [`CommitSummarizer`]; [`OpenAiClient`] is the shipped
//! implementation of the first two.

mod openai;

pub use openai::OpenAiClient;

use crate::error::{ChatError, EmbeddingError};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Stream of incremental completion text fragments
///
/// Dropping the stream cancels the request and releases the upstream
/// connection.
pub type TokenStream = BoxStream<'static, Result<String, ChatError>>;

/// One message in a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Batched text embedding
///
/// One vector per input text, in input order; empty input yields empty output.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Chat completion, blocking and streaming
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ChatError>;

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<TokenStream, ChatError>;
}

/// Commit summarization as seen by the chunk pipeline
///
/// The extractor treats a failure here as a signal to fall back to its
/// deterministic summary, never as a fatal error.
#[async_trait::async_trait]
pub trait CommitSummarizer: Send + Sync {
    async fn summarize(&self, payload: &serde_json::Value) -> Result<String, ChatError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_constructors() {
        let msg = ChatMessage::system("you are helpful");
        assert_eq!(msg.role, "system");
        let msg = ChatMessage::user("hello");
        assert_eq!(msg.role, "user");
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn test_chat_message_serializes_for_api() {
        let msg = ChatMessage::user("q");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "q");
    }
}
