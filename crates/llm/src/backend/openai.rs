//! OpenAI wire adapter: `POST /chat/completions`, Bearer auth, SSE streaming.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use ragchat_core::{FinishReason, LlmChatRequest, LlmChatResponse, LlmRole};

use super::{retry_with_backoff, LlmBackend, StreamToken};
use crate::LlmError;

/// Models whose completions endpoint rejects `max_tokens` in favor of
/// `max_completion_tokens`.
const RESERVED_TOKEN_MODEL_PREFIXES: &[&str] = &["o1", "o3", "o4", "gpt-5"];

pub struct OpenAiBackend {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    max_retries: u32,
    initial_backoff: Duration,
}

impl OpenAiBackend {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.api_url.trim_end_matches('/'))
    }

    fn uses_reserved_tokens_field(model: &str) -> bool {
        RESERVED_TOKEN_MODEL_PREFIXES.iter().any(|p| model.starts_with(p))
    }

    fn build_request(&self, req: &LlmChatRequest, stream: bool) -> OpenAiChatRequest {
        let model = req.model.clone().unwrap_or_else(|| self.model.clone());
        let (max_tokens, max_completion_tokens) = if Self::uses_reserved_tokens_field(&model) {
            (None, req.max_tokens)
        } else {
            (req.max_tokens, None)
        };

        OpenAiChatRequest {
            model,
            messages: req.messages.iter().map(OpenAiMessage::from).collect(),
            stream,
            temperature: req.temperature,
            max_tokens,
            max_completion_tokens,
        }
    }

    async fn execute(&self, request: &OpenAiChatRequest) -> Result<OpenAiChatResponse, LlmError> {
        let response = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status: status.as_u16(), snippet: truncate(&body) });
        }

        response.json().await.map_err(|e| LlmError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn chat(&self, req: &LlmChatRequest) -> Result<LlmChatResponse, LlmError> {
        let request = self.build_request(req, false);
        let model = request.model.clone();

        let response = retry_with_backoff(self.max_retries, self.initial_backoff, || async {
            self.execute(&request).await
        })
        .await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Protocol("response had no choices".to_string()))?;

        Ok(LlmChatResponse {
            content: choice.message.content,
            model,
            finish_reason: map_finish_reason(choice.finish_reason.as_deref()),
            prompt_tokens: response.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: response.usage.as_ref().map(|u| u.completion_tokens),
        })
    }

    async fn chat_stream(
        &self,
        req: &LlmChatRequest,
        tx: mpsc::Sender<StreamToken>,
    ) -> Result<LlmChatResponse, LlmError> {
        let request = self.build_request(req, true);
        let model = request.model.clone();

        let response = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status: status.as_u16(), snippet: truncate(&body) });
        }

        let mut byte_stream = response.bytes_stream();
        let mut full_text = String::new();
        let mut finish_reason = FinishReason::Stop;
        let mut leftover = String::new();
        let mut terminal_sent = false;

        while let Some(bytes) = byte_stream.next().await {
            let bytes = bytes.map_err(|e| LlmError::Transport(e.to_string()))?;
            leftover.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline_pos) = leftover.find('\n') {
                let line = leftover[..newline_pos].trim().to_string();
                leftover.drain(..=newline_pos);

                if line.is_empty() {
                    continue;
                }
                let Some(payload) = line.strip_prefix("data: ") else { continue };
                if payload == "[DONE]" {
                    if !terminal_sent {
                        terminal_sent = true;
                        let _ = tx.send(StreamToken::terminal()).await;
                    }
                    continue;
                }

                let chunk: OpenAiStreamChunk = match serde_json::from_str(payload) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping malformed openai SSE frame");
                        continue;
                    }
                };

                if let Some(choice) = chunk.choices.into_iter().next() {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            full_text.push_str(&content);
                            let _ = tx.send(StreamToken::chunk(content)).await;
                        }
                    }
                    if let Some(reason) = choice.finish_reason {
                        finish_reason = map_finish_reason(Some(&reason));
                        if !terminal_sent {
                            terminal_sent = true;
                            let _ = tx.send(StreamToken::terminal()).await;
                        }
                    }
                }
            }
        }

        if !terminal_sent {
            let _ = tx.send(StreamToken::terminal()).await;
        }

        Ok(LlmChatResponse { content: full_text, model, finish_reason, prompt_tokens: None, completion_tokens: None })
    }

    async fn check_availability(&self) -> bool {
        let url = format!("{}/models", self.api_url.trim_end_matches('/'));
        matches!(
            self.client
                .get(url)
                .bearer_auth(&self.api_key)
                .timeout(Duration::from_secs(5))
                .send()
                .await,
            Ok(r) if r.status().is_success()
        )
    }

    fn name(&self) -> &str {
        "openai"
    }
}

fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some(_) => FinishReason::Unknown,
        None => FinishReason::Unknown,
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(500).collect()
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

impl From<&ragchat_core::LlmMessage> for OpenAiMessage {
    fn from(msg: &ragchat_core::LlmMessage) -> Self {
        let role = match msg.role {
            LlmRole::System => "system",
            LlmRole::User => "user",
            LlmRole::Assistant => "assistant",
        };
        Self { role: role.to_string(), content: msg.content.clone() }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_models_use_max_completion_tokens() {
        assert!(OpenAiBackend::uses_reserved_tokens_field("o3-mini"));
        assert!(OpenAiBackend::uses_reserved_tokens_field("gpt-5"));
        assert!(!OpenAiBackend::uses_reserved_tokens_field("gpt-4o"));
    }

    #[test]
    fn build_request_picks_token_field_by_model() {
        let backend =
            OpenAiBackend::new("https://api.openai.com/v1", "sk-test", "gpt-4o", Duration::from_secs(30)).unwrap();
        let req = LlmChatRequest::new(vec![ragchat_core::LlmMessage::user("hi")])
            .with_model("o3-mini")
            .with_max_tokens(256);
        let wire = backend.build_request(&req, false);
        assert_eq!(wire.max_tokens, None);
        assert_eq!(wire.max_completion_tokens, Some(256));
    }

    #[test]
    fn stream_done_sentinel_maps_to_terminal() {
        assert_eq!(map_finish_reason(Some("stop")), FinishReason::Stop);
        assert_eq!(map_finish_reason(Some("length")), FinishReason::Length);
    }
}
