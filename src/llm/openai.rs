use super::{ChatMessage, ChatProvider, EmbeddingProvider, TokenStream};
use crate::config::LlmConfig;
use crate::error::{ChatError, EmbeddingError};
use futures::StreamExt;
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Client for an OpenAI-compatible embeddings and chat API
///
/// Rate limits (429) and server errors (5xx) are retried with exponential
/// backoff: 1s, 2s, 4s, ... capped at 32s. Client errors fail immediately.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    embedding_model: String,
    timeout_secs: u64,
    max_retries: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiClient {
    /// Create a client from configuration; the API key comes from the
    /// `OPENAI_API_KEY` environment variable
    pub fn from_config(config: &LlmConfig) -> Result<Self, ChatError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ChatError::Connection("OPENAI_API_KEY not set".to_string()))?;
        Self::new(
            api_key,
            config.base_url.clone(),
            config.embedding_model.clone(),
            config.timeout_secs,
            config.max_retries,
        )
    }

    pub fn new(
        api_key: String,
        base_url: String,
        embedding_model: String,
        timeout_secs: u64,
        max_retries: usize,
    ) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ChatError::Connection(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            embedding_model,
            timeout_secs,
            max_retries,
        })
    }

    fn backoff(attempt: usize) -> Duration {
        Duration::from_secs(1 << (attempt - 1).min(5))
    }

    async fn post_with_retry(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, RequestFailure> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_failure = RequestFailure::Connection("no attempts made".to_string());

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Self::backoff(attempt)).await;
                tracing::debug!("Retrying {} (attempt {})", path, attempt + 1);
            }

            let result = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }

                    let message = resp.text().await.unwrap_or_default();
                    let failure = if status.as_u16() == 429 {
                        RequestFailure::RateLimited
                    } else {
                        RequestFailure::Api {
                            status: status.as_u16(),
                            message: truncate(&message, 300),
                        }
                    };

                    // Only rate limits and server errors are worth retrying
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_failure = failure;
                        continue;
                    }
                    return Err(failure);
                }
                Err(e) if e.is_timeout() => {
                    last_failure = RequestFailure::Timeout(self.timeout_secs);
                    continue;
                }
                Err(e) => {
                    last_failure = RequestFailure::Connection(e.to_string());
                    continue;
                }
            }
        }

        Err(last_failure)
    }

    fn chat_body(
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        max_tokens: u32,
        stream: bool,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });
        if stream {
            body["stream"] = serde_json::Value::Bool(true);
        }
        body
    }
}

/// Transport-level failure, convertible into either provider error type
enum RequestFailure {
    RateLimited,
    Timeout(u64),
    Connection(String),
    Api { status: u16, message: String },
}

impl From<RequestFailure> for EmbeddingError {
    fn from(f: RequestFailure) -> Self {
        match f {
            RequestFailure::RateLimited => EmbeddingError::RateLimited,
            RequestFailure::Timeout(secs) => EmbeddingError::Timeout(secs),
            RequestFailure::Connection(msg) => EmbeddingError::Connection(msg),
            RequestFailure::Api { status, message } => EmbeddingError::Api { status, message },
        }
    }
}

impl From<RequestFailure> for ChatError {
    fn from(f: RequestFailure) -> Self {
        match f {
            RequestFailure::RateLimited => ChatError::RateLimited,
            RequestFailure::Timeout(secs) => ChatError::Timeout(secs),
            RequestFailure::Connection(msg) => ChatError::Connection(msg),
            RequestFailure::Api { status, message } => ChatError::Api { status, message },
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenAiClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!("Requesting embeddings for {} texts", texts.len());

        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": texts,
        });

        let resp = self.post_with_retry("/embeddings", &body).await?;
        let parsed: EmbeddingResponse = resp.json().await.map_err(|e| EmbeddingError::Api {
            status: 200,
            message: format!("malformed embedding response: {}", e),
        })?;

        if parsed.data.is_empty() {
            return Err(EmbeddingError::EmptyResponse);
        }
        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: parsed.data.len(),
            });
        }

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait::async_trait]
impl ChatProvider for OpenAiClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ChatError> {
        let body = Self::chat_body(messages, model, temperature, max_tokens, false);
        let resp = self.post_with_retry("/chat/completions", &body).await?;

        let parsed: ChatResponse = resp.json().await.map_err(|e| ChatError::Api {
            status: 200,
            message: format!("malformed chat response: {}", e),
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or(ChatError::EmptyResponse)
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<TokenStream, ChatError> {
        let body = Self::chat_body(messages, model, temperature, max_tokens, true);
        let resp = self.post_with_retry("/chat/completions", &body).await?;

        let state = SseState {
            inner: resp.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed(),
            buf: Vec::new(),
            pending: VecDeque::new(),
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(token) = st.pending.pop_front() {
                    return Some((Ok(token), st));
                }
                if st.done {
                    return None;
                }

                match st.inner.next().await {
                    None => return None,
                    Some(Err(e)) => {
                        st.done = true;
                        return Some((Err(ChatError::StreamDecode(e.to_string())), st));
                    }
                    Some(Ok(bytes)) => {
                        st.buf.extend_from_slice(&bytes);
                        st.drain_events();
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}

type BoxByteStream = futures::stream::BoxStream<'static, reqwest::Result<Vec<u8>>>;

/// Incremental server-sent-events parser over a byte stream
struct SseState {
    inner: BoxByteStream,
    buf: Vec<u8>,
    pending: VecDeque<String>,
    done: bool,
}

impl SseState {
    /// Consume complete lines from the buffer, queueing any content deltas
    fn drain_events(&mut self) {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                self.done = true;
                return;
            }

            if let Ok(event) = serde_json::from_str::<serde_json::Value>(data) {
                if let Some(delta) = event["choices"][0]["delta"]["content"].as_str() {
                    if !delta.is_empty() {
                        self.pending.push_back(delta.to_string());
                    }
                }
            }
        }
    }
}
