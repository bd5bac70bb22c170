//! Ollama wire adapter: `POST /api/chat`, no auth, NDJSON streaming.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use ragchat_core::{FinishReason, LlmChatRequest, LlmChatResponse, LlmRole};

use super::{retry_with_backoff, LlmBackend, StreamToken};
use crate::LlmError;

pub struct OllamaBackend {
    client: Client,
    api_url: String,
    model: String,
    max_retries: u32,
    initial_backoff: Duration,
}

impl OllamaBackend {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            model: model.into(),
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.api_url.trim_end_matches('/'))
    }

    fn build_request(&self, req: &LlmChatRequest, stream: bool) -> OllamaChatRequest {
        OllamaChatRequest {
            model: req.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: req.messages.iter().map(OllamaMessage::from).collect(),
            stream,
            options: OllamaOptions {
                temperature: req.temperature,
                num_predict: req.max_tokens.map(|n| n as i64),
            },
        }
    }

    async fn execute(&self, request: &OllamaChatRequest) -> Result<OllamaChatResponse, LlmError> {
        let response = self.client.post(self.chat_url()).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status: status.as_u16(), snippet: truncate(&body) });
        }

        response.json().await.map_err(|e| LlmError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn chat(&self, req: &LlmChatRequest) -> Result<LlmChatResponse, LlmError> {
        let request = self.build_request(req, false);
        let model = request.model.clone();

        let response = retry_with_backoff(self.max_retries, self.initial_backoff, || async {
            self.execute(&request).await
        })
        .await?;

        Ok(LlmChatResponse {
            content: response.message.content,
            model,
            finish_reason: if response.done { FinishReason::Stop } else { FinishReason::Length },
            prompt_tokens: None,
            completion_tokens: response.eval_count,
        })
    }

    async fn chat_stream(
        &self,
        req: &LlmChatRequest,
        tx: mpsc::Sender<StreamToken>,
    ) -> Result<LlmChatResponse, LlmError> {
        let request = self.build_request(req, true);
        let model = request.model.clone();

        let response = self.client.post(self.chat_url()).json(&request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status: status.as_u16(), snippet: truncate(&body) });
        }

        let mut byte_stream = response.bytes_stream();
        let mut full_text = String::new();
        let mut eval_count = None;
        let mut finish_reason = FinishReason::Stop;

        while let Some(bytes) = byte_stream.next().await {
            let bytes = bytes.map_err(|e| LlmError::Transport(e.to_string()))?;
            let text = String::from_utf8_lossy(&bytes);

            for line in text.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let chunk: OllamaChatResponse = match serde_json::from_str(line) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping malformed ollama stream line");
                        continue;
                    }
                };

                full_text.push_str(&chunk.message.content);
                if !chunk.message.content.is_empty() {
                    let _ = tx.send(StreamToken::chunk(chunk.message.content.clone())).await;
                }

                if chunk.done {
                    eval_count = chunk.eval_count;
                    finish_reason = FinishReason::Stop;
                    let _ = tx.send(StreamToken::terminal()).await;
                }
            }
        }

        Ok(LlmChatResponse { content: full_text, model, finish_reason, prompt_tokens: None, completion_tokens: eval_count })
    }

    async fn check_availability(&self) -> bool {
        let url = format!("{}/api/tags", self.api_url.trim_end_matches('/'));
        let response = match self.client.get(url).timeout(Duration::from_secs(5)).send().await {
            Ok(r) if r.status().is_success() => r,
            _ => return false,
        };

        if self.model.is_empty() {
            return true;
        }

        let tags: OllamaTagsResponse = match response.json().await {
            Ok(t) => t,
            Err(_) => return false,
        };
        tags.models.iter().any(|m| m.name == self.model)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(500).collect()
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl From<&ragchat_core::LlmMessage> for OllamaMessage {
    fn from(msg: &ragchat_core::LlmMessage) -> Self {
        let role = match msg.role {
            LlmRole::System => "system",
            LlmRole::User => "user",
            LlmRole::Assistant => "assistant",
        };
        Self { role: role.to_string(), content: msg.content.clone() }
    }
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    done: bool,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaModelEntry>,
}

#[derive(Debug, Deserialize)]
struct OllamaModelEntry {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_role_maps_to_lowercase_wire_role() {
        let msg = ragchat_core::LlmMessage::user("hi");
        let wire = OllamaMessage::from(&msg);
        assert_eq!(wire.role, "user");
        assert_eq!(wire.content, "hi");
    }

    #[test]
    fn build_request_carries_temperature_and_max_tokens() {
        let backend = OllamaBackend::new("http://localhost:11434", "llama3", Duration::from_secs(30)).unwrap();
        let req = LlmChatRequest::new(vec![ragchat_core::LlmMessage::user("hi")])
            .with_temperature(0.3)
            .with_max_tokens(128);
        let wire = backend.build_request(&req, true);
        assert_eq!(wire.options.temperature, Some(0.3));
        assert_eq!(wire.options.num_predict, Some(128));
        assert!(wire.stream);
    }
}
