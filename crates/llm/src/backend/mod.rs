//! Per-provider wire adapters.
//!
//! Each backend hides its own request encoding, streaming frame format, and
//! availability probe behind the same `LlmBackend` trait so the façade and
//! registry never branch on provider.

pub mod gemini;
pub mod ollama;
pub mod openai;

pub use gemini::GeminiBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use async_trait::async_trait;
use ragchat_core::LlmChatRequest;
use tokio::sync::mpsc;

use crate::LlmError;

/// One fragment of a streamed response.
#[derive(Debug, Clone)]
pub struct StreamToken {
    pub content: String,
    /// `true` on the final call; `content` may be empty in that case.
    pub done: bool,
}

impl StreamToken {
    pub fn chunk(content: impl Into<String>) -> Self {
        Self { content: content.into(), done: false }
    }

    pub fn terminal() -> Self {
        Self { content: String::new(), done: true }
    }
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// A non-streaming chat completion, blocking until the full response is
    /// available. Transport-level failures are retried with backoff; a 4xx
    /// response is returned immediately.
    async fn chat(&self, request: &LlmChatRequest) -> Result<ragchat_core::LlmChatResponse, LlmError>;

    /// A streaming chat completion. Tokens are sent over `tx` as they
    /// arrive; the driver guarantees exactly one terminal `StreamToken`
    /// with `done = true` on success. Streaming calls are never retried
    /// once headers have been received.
    async fn chat_stream(
        &self,
        request: &LlmChatRequest,
        tx: mpsc::Sender<StreamToken>,
    ) -> Result<ragchat_core::LlmChatResponse, LlmError>;

    /// One-shot reachability probe, used both synchronously on first use
    /// and periodically by the backend registry.
    async fn check_availability(&self) -> bool;

    fn name(&self) -> &str;
}

/// Exponential backoff retry shared by all three backends' non-streaming
/// `chat()` paths. `is_retryable` decides whether a given error is worth
/// another attempt; 4xx API errors never are.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    max_attempts: u32,
    initial_backoff: std::time::Duration,
    mut attempt: F,
) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, LlmError>>,
{
    let mut backoff = initial_backoff;
    let mut last_error = None;

    for attempt_no in 0..=max_attempts {
        if attempt_no > 0 {
            tracing::warn!(attempt = attempt_no, ?backoff, "retrying LLM request after transport failure");
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }

        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => last_error = Some(e),
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| LlmError::Transport("max retries exceeded".to_string())))
}
