//! Gemini wire adapter: API key as a query parameter, JSON-array streaming.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use ragchat_core::{FinishReason, LlmChatRequest, LlmChatResponse, LlmRole};

use super::{retry_with_backoff, LlmBackend, StreamToken};
use crate::LlmError;

pub struct GeminiBackend {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    max_retries: u32,
    initial_backoff: Duration,
}

impl GeminiBackend {
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

    fn endpoint(&self, model: &str, action: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.api_url.trim_end_matches('/'),
            model,
            action,
            self.api_key
        )
    }

    /// Gemini has no assistant role in its wire format; the assistant's
    /// turns are sent back as `model`. System messages have no dedicated
    /// turn slot and are concatenated into `systemInstruction` instead.
    fn build_request(&self, req: &LlmChatRequest) -> (String, GeminiRequest) {
        let model = req.model.clone().unwrap_or_else(|| self.model.clone());

        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for msg in &req.messages {
            match msg.role {
                LlmRole::System => system_parts.push(msg.content.clone()),
                LlmRole::User => contents.push(GeminiContent {
                    role: "user".to_string(),
                    parts: vec![GeminiPart { text: msg.content.clone() }],
                }),
                LlmRole::Assistant => contents.push(GeminiContent {
                    role: "model".to_string(),
                    parts: vec![GeminiPart { text: msg.content.clone() }],
                }),
            }
        }

        let system_instruction = if system_parts.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: "system".to_string(),
                parts: vec![GeminiPart { text: system_parts.join("\n") }],
            })
        };

        let request = GeminiRequest {
            system_instruction,
            contents,
            generation_config: GeminiGenerationConfig {
                temperature: req.temperature,
                max_output_tokens: req.max_tokens,
            },
        };

        (model, request)
    }

    async fn execute(&self, model: &str, request: &GeminiRequest) -> Result<GeminiResponse, LlmError> {
        let url = self.endpoint(model, "generateContent");
        let response = self.client.post(url).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status: status.as_u16(), snippet: truncate(&body) });
        }

        response.json().await.map_err(|e| LlmError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    async fn chat(&self, req: &LlmChatRequest) -> Result<LlmChatResponse, LlmError> {
        let (model, request) = self.build_request(req);

        let response = retry_with_backoff(self.max_retries, self.initial_backoff, || async {
            self.execute(&model, &request).await
        })
        .await?;

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Protocol("response had no candidates".to_string()))?;

        let content = candidate
            .content
            .and_then(|c| c.parts.into_iter().next())
            .map(|p| p.text)
            .unwrap_or_default();

        Ok(LlmChatResponse {
            content,
            model,
            finish_reason: map_finish_reason(candidate.finish_reason.as_deref()),
            prompt_tokens: response.usage_metadata.as_ref().map(|u| u.prompt_token_count),
            completion_tokens: response.usage_metadata.as_ref().map(|u| u.candidates_token_count),
        })
    }

    async fn chat_stream(
        &self,
        req: &LlmChatRequest,
        tx: mpsc::Sender<StreamToken>,
    ) -> Result<LlmChatResponse, LlmError> {
        let (model, request) = self.build_request(req);
        let url = self.endpoint(&model, "streamGenerateContent");

        let response = self.client.post(url).json(&request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status: status.as_u16(), snippet: truncate(&body) });
        }

        let mut byte_stream = response.bytes_stream();
        let mut full_text = String::new();
        let mut finish_reason = FinishReason::Stop;
        let mut buffer = String::new();

        while let Some(bytes) = byte_stream.next().await {
            let bytes = bytes.map_err(|e| LlmError::Transport(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            // The response body is a single top-level JSON array; Gemini
            // flushes it one element at a time, so each flushed write is a
            // complete object optionally preceded by `[` or `,` and
            // followed by `,` or the closing `]`.
            loop {
                let trimmed = buffer.trim_start();
                let lead_trimmed = trimmed.trim_start_matches(['[', ',']).trim_start();
                if lead_trimmed.is_empty() {
                    buffer.clear();
                    break;
                }

                match extract_one_object(lead_trimmed) {
                    Some((object_str, rest)) => {
                        if let Ok(chunk) = serde_json::from_str::<GeminiResponse>(object_str) {
                            if let Some(candidate) = chunk.candidates.into_iter().next() {
                                if let Some(text) =
                                    candidate.content.and_then(|c| c.parts.into_iter().next()).map(|p| p.text)
                                {
                                    if !text.is_empty() {
                                        full_text.push_str(&text);
                                        let _ = tx.send(StreamToken::chunk(text)).await;
                                    }
                                }
                                if let Some(reason) = candidate.finish_reason {
                                    finish_reason = map_finish_reason(Some(&reason));
                                }
                            }
                        }
                        buffer = rest.trim_start_matches([',', ']']).to_string();
                    }
                    None => break,
                }
            }
        }

        let _ = tx.send(StreamToken::terminal()).await;

        Ok(LlmChatResponse { content: full_text, model, finish_reason, prompt_tokens: None, completion_tokens: None })
    }

    async fn check_availability(&self) -> bool {
        let url = format!(
            "{}/models/{}?key={}",
            self.api_url.trim_end_matches('/'),
            self.model,
            self.api_key
        );
        matches!(
            self.client.get(url).timeout(Duration::from_secs(5)).send().await,
            Ok(r) if r.status().is_success()
        )
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// Finds the first balanced `{...}` object at the start of `input` (after
/// leading whitespace), returning it and the remainder of the string. Returns
/// `None` if the buffered text doesn't yet contain a complete object.
fn extract_one_object(input: &str) -> Option<(&str, &str)> {
    let bytes = input.as_bytes();
    if bytes.first() != Some(&b'{') {
        return None;
    }

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(input.split_at(i + 1));
                }
            }
            _ => {}
        }
    }

    None
}

fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("STOP") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some(_) => FinishReason::Unknown,
        None => FinishReason::Unknown,
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(500).collect()
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_are_merged_into_system_instruction() {
        let backend =
            GeminiBackend::new("https://generativelanguage.googleapis.com/v1beta", "key", "gemini-1.5-flash", Duration::from_secs(30))
                .unwrap();
        let req = LlmChatRequest::new(vec![
            ragchat_core::LlmMessage::system("be terse"),
            ragchat_core::LlmMessage::system("answer in english"),
            ragchat_core::LlmMessage::user("hi"),
        ]);
        let (_, wire) = backend.build_request(&req);
        let instruction = wire.system_instruction.unwrap();
        assert_eq!(instruction.parts[0].text, "be terse\nanswer in english");
        assert_eq!(wire.contents.len(), 1);
    }

    #[test]
    fn assistant_role_is_sent_as_model() {
        let backend =
            GeminiBackend::new("https://generativelanguage.googleapis.com/v1beta", "key", "gemini-1.5-flash", Duration::from_secs(30))
                .unwrap();
        let req = LlmChatRequest::new(vec![
            ragchat_core::LlmMessage::user("hi"),
            ragchat_core::LlmMessage::assistant("hello"),
        ]);
        let (_, wire) = backend.build_request(&req);
        assert_eq!(wire.contents[1].role, "model");
    }

    #[test]
    fn extract_one_object_finds_balanced_braces_with_nested_strings() {
        let input = r#"{"a": "}", "b": 1}, {"c": 2}"#;
        let (obj, rest) = extract_one_object(input).unwrap();
        assert_eq!(obj, r#"{"a": "}", "b": 1}"#);
        assert_eq!(rest, r#", {"c": 2}"#);
    }

    #[test]
    fn extract_one_object_returns_none_on_incomplete_buffer() {
        assert!(extract_one_object(r#"{"a": "incomplete"#).is_none());
    }
}
