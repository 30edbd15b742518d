//! Prompt text and the LLM-backed commit summarizer

use crate::error::ChatError;
use crate::llm::{ChatMessage, ChatProvider, CommitSummarizer};
use std::sync::Arc;

/// System prompt for commit summarization during chunk generation
pub const COMMIT_SUMMARY_PROMPT: &str = "You are an assistant that summarizes Git commits for retrieval-augmented search. Given a JSON description of a single commit, write a concise but detailed, developer-facing summary in English.

Requirements:
- Explain the intent of the change if possible.
- Highlight key changes grouped by file.
- Mention important functions, classes, modules, or APIs.
- Use clear bullet points, no markdown headings needed.
- Do NOT restate the commit hash or author.";

/// System prompt template for chat answers; `{context}` is replaced with the
/// formatted retrieval results
pub const CHAT_SYSTEM_PROMPT: &str = "You are Repo Mentor, a knowledgeable AI assistant that helps developers understand git repositories through their commit history.

Your goal is to provide clear, informative answers that balance technical detail with accessibility.

RESPONSE RULES:
1. Keep answers CONCISE - 3-5 sentences (about 100-150 words)
2. ALWAYS reference at least one specific commit when relevant to the question
3. Be technical but clear - use proper terminology but explain briefly when needed
4. Focus on WHAT was built, WHY it matters, and HOW it works (high-level)
5. Include specific file names, features, or components when referencing commits
6. Be friendly but professional

STRUCTURE YOUR ANSWERS:
- Start with a direct answer to the question
- Reference specific commits with what they added/changed
- Explain the purpose or impact
- Keep it focused and avoid unnecessary details

## Repository Context for this Question:
{context}";

/// Build the chat system prompt with retrieved context inlined
pub fn build_chat_prompt(context: &str) -> String {
    CHAT_SYSTEM_PROMPT.replace("{context}", context)
}

/// Summarizer that delegates to a chat provider
pub struct LlmSummarizer {
    chat: Arc<dyn ChatProvider>,
    model: String,
}

impl LlmSummarizer {
    pub fn new(chat: Arc<dyn ChatProvider>, model: impl Into<String>) -> Self {
        Self {
            chat,
            model: model.into(),
        }
    }
}

#[async_trait::async_trait]
impl CommitSummarizer for LlmSummarizer {
    async fn summarize(&self, payload: &serde_json::Value) -> Result<String, ChatError> {
        let user = format!(
            "Here is one commit as JSON. Summarize it in the following structure:\n\n\
             Summary:\n- ...\n\n\
             Files:\n- <path>: <short description>\n\n\
             Commit JSON:\n{}",
            payload
        );

        let messages = vec![
            ChatMessage::system(COMMIT_SUMMARY_PROMPT),
            ChatMessage::user(user),
        ];

        self.chat.complete(&messages, &self.model, 0.2, 4096).await
    }
}
