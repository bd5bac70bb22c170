//! The RAG-specific operations built on top of a raw [`LlmBackend`].
//!
//! Every primitive here is a thin wrapper: render a prompt template, call
//! the backend, and — for the two classification primitives — parse the
//! response through the [`crate::json`] resilience cascade rather than
//! failing the turn on a malformed model reply.

use std::sync::Arc;

use ragchat_core::{
    ChatMessage, ChatRole, Document, IntentDetectionResult, LlmChatRequest, LlmChatResponse, LlmMessage,
    Locale, PhaseSink, RelevanceEvaluationResult,
};
use tokio::sync::mpsc;

use crate::backend::{LlmBackend, StreamToken};
use crate::json;
use crate::LlmError;

/// Text substituted for `{{documentUrl}}` etc. Unset placeholders are left
/// in the rendered string verbatim, matching "pure text replacement" with
/// no templating engine.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

/// Default prompt templates used when a primitive has no configured
/// override. Each is plain text with `{{placeholder}}` markers; see
/// [`render`].
pub struct PromptTemplates {
    pub detect_intent: String,
    pub evaluate_results: String,
    pub generate_answer: String,
    pub faq_answer: String,
    pub summary_answer: String,
    pub unclear_intent: String,
    pub no_results: String,
    pub document_not_found: String,
    pub direct_answer: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            detect_intent: concat!(
                "Classify the user's message into one of: search, faq, summary, unclear.\n",
                "Respond with JSON only: ",
                "{\"intent\": \"search\"|\"faq\"|\"summary\"|\"unclear\", ",
                "\"query\": string (for search/faq), ",
                "\"documentUrl\": string (for summary), ",
                "\"reasoning\": string}.\n\n",
                "Message: {{userMessage}}"
            )
            .to_string(),
            evaluate_results: concat!(
                "The user asked: {{userMessage}}\n",
                "Search query used: {{query}}\n\n",
                "Search results:\n{{searchResults}}\n\n",
                "Which results (by number) actually answer the user's question? ",
                "Select at most {{maxRelevantDocs}}. ",
                "Respond with JSON only: ",
                "{\"hasRelevantResults\": bool, \"relevantIndexes\": int[]}."
            )
            .to_string(),
            generate_answer: concat!(
                "{{systemPrompt}}\n{{languageInstruction}}\n\n",
                "Use the following context to answer the user. ",
                "Cite sources by their [index] when you rely on them.\n\n",
                "{{context}}"
            )
            .to_string(),
            faq_answer: concat!(
                "{{systemPrompt}}\n{{languageInstruction}}\n\n",
                "Answer concisely, citing the relevant FAQ entries by [index]. ",
                "If the context does not answer the question, say so.\n\n",
                "{{context}}"
            )
            .to_string(),
            summary_answer: concat!(
                "{{systemPrompt}}\n{{languageInstruction}}\n\n",
                "Summarize the following document. Use only the information it ",
                "contains; do not rely on outside knowledge.\n\n",
                "Document ({{documentUrl}}):\n{{documentContent}}"
            )
            .to_string(),
            unclear_intent: concat!(
                "{{languageInstruction}}\n\n",
                "The user's message was unclear. Ask a brief clarifying question ",
                "without guessing at their intent.\n\nMessage: {{userMessage}}"
            )
            .to_string(),
            no_results: concat!(
                "{{languageInstruction}}\n\n",
                "No relevant results were found for the user's question. Say so ",
                "plainly and invite them to rephrase.\n\nMessage: {{userMessage}}"
            )
            .to_string(),
            document_not_found: concat!(
                "{{languageInstruction}}\n\n",
                "The requested document could not be found. Say so plainly.\n\n",
                "Requested URL: {{documentUrl}}"
            )
            .to_string(),
            direct_answer: concat!(
                "{{systemPrompt}}\n{{languageInstruction}}\n\nMessage: {{userMessage}}"
            )
            .to_string(),
        }
    }
}

/// A document field read with a fallback, matching the façade's
/// "title / URL / content, falling back to content_description" rule.
fn field_or<'a>(doc: &'a Document, field: &str, fallback: &'a str) -> &'a str {
    doc.get(field).map(String::as_str).unwrap_or(fallback)
}

/// Builds the numbered `[i] title / url / content` context block used by
/// `generateAnswer`/`generateFaqAnswerResponse`, truncated to
/// `max_chars` with a trailing `...` when truncation occurred.
pub fn build_context(documents: &[Document], max_chars: usize) -> String {
    let mut block = String::new();
    for (i, doc) in documents.iter().enumerate() {
        let title = field_or(doc, "title", "untitled");
        let url = field_or(doc, "url", "");
        let content = doc
            .get("content")
            .or_else(|| doc.get("content_description"))
            .map(String::as_str)
            .unwrap_or("");
        block.push_str(&format!("[{}] {} / {} / {}\n", i + 1, title, url, content));
    }

    if block.chars().count() > max_chars {
        let truncated: String = block.chars().take(max_chars).collect();
        format!("{truncated}...")
    } else {
        block
    }
}

/// Builds the `[i] Title:… / Description:…` hit summary used by
/// `evaluateResults`.
fn format_hits_for_evaluation(documents: &[Document]) -> String {
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let title = field_or(doc, "title", "untitled");
            let description = doc
                .get("content_description")
                .or_else(|| doc.get("content"))
                .map(String::as_str)
                .unwrap_or("");
            format!("[{}] Title: {} / Description: {}", i + 1, title, description)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn history_to_llm_messages(history: &[ChatMessage]) -> Vec<LlmMessage> {
    history
        .iter()
        .map(|m| match m.role {
            ChatRole::User => LlmMessage::user(m.content.clone()),
            ChatRole::Assistant => LlmMessage::assistant(m.content.clone()),
        })
        .collect()
}

pub struct LlmFacade {
    backend: Arc<dyn LlmBackend>,
    templates: PromptTemplates,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
    context_max_chars: usize,
    evaluation_max_relevant_docs: usize,
}

impl LlmFacade {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        system_prompt: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
        context_max_chars: usize,
        evaluation_max_relevant_docs: usize,
    ) -> Self {
        Self {
            backend,
            templates: PromptTemplates::default(),
            system_prompt: system_prompt.into(),
            temperature,
            max_tokens,
            context_max_chars,
            evaluation_max_relevant_docs,
        }
    }

    pub fn with_templates(mut self, templates: PromptTemplates) -> Self {
        self.templates = templates;
        self
    }

    fn base_request(&self, messages: Vec<LlmMessage>) -> LlmChatRequest {
        LlmChatRequest::new(messages).with_temperature(self.temperature).with_max_tokens(self.max_tokens)
    }

    pub async fn detect_intent(&self, user_message: &str) -> IntentDetectionResult {
        let prompt = render(&self.templates.detect_intent, &[("userMessage", user_message)]);
        let request = self.base_request(vec![LlmMessage::user(prompt)]);

        match self.backend.chat(&request).await {
            Ok(response) => json::parse_intent(&response.content, user_message),
            Err(e) => {
                tracing::warn!(error = %e, "intent detection call failed");
                IntentDetectionResult::search_fallback(user_message, e.to_string())
            }
        }
    }

    pub async fn evaluate_results(
        &self,
        user_message: &str,
        query: &str,
        hits: &[Document],
    ) -> RelevanceEvaluationResult {
        let doc_ids: Vec<String> = hits.iter().map(|d| field_or(d, "doc_id", "").to_string()).collect();
        if hits.is_empty() {
            return RelevanceEvaluationResult::none();
        }

        let prompt = render(
            &self.templates.evaluate_results,
            &[
                ("userMessage", user_message),
                ("query", query),
                ("searchResults", &format_hits_for_evaluation(hits)),
                ("maxRelevantDocs", &self.evaluation_max_relevant_docs.to_string()),
            ],
        );
        let request = self.base_request(vec![LlmMessage::user(prompt)]);

        match self.backend.chat(&request).await {
            Ok(response) => json::parse_relevance(&response.content, &doc_ids, self.evaluation_max_relevant_docs),
            Err(e) => {
                tracing::warn!(error = %e, "relevance evaluation call failed");
                RelevanceEvaluationResult::all_relevant(&doc_ids, self.evaluation_max_relevant_docs)
            }
        }
    }

    fn answer_messages(
        &self,
        template: &str,
        context: &str,
        history: &[ChatMessage],
        user_message: &str,
        locale: &Locale,
    ) -> Vec<LlmMessage> {
        let system = render(
            template,
            &[
                ("systemPrompt", &self.system_prompt),
                ("context", context),
                ("languageInstruction", &locale.language_instruction()),
            ],
        );

        let mut messages = vec![LlmMessage::system(system)];
        messages.extend(history_to_llm_messages(history));
        messages.push(LlmMessage::user(user_message));
        messages
    }

    pub async fn generate_answer(
        &self,
        user_message: &str,
        documents: &[Document],
        history: &[ChatMessage],
        locale: &Locale,
    ) -> Result<LlmChatResponse, LlmError> {
        let context = build_context(documents, self.context_max_chars);
        let messages = self.answer_messages(&self.templates.generate_answer, &context, history, user_message, locale);
        self.backend.chat(&self.base_request(messages)).await
    }

    fn faq_messages(&self, documents: &[Document], history: &[ChatMessage], user_message: &str, locale: &Locale) -> Vec<LlmMessage> {
        let context = build_context(documents, self.context_max_chars);
        self.answer_messages(&self.templates.faq_answer, &context, history, user_message, locale)
    }

    fn summary_messages(&self, document_url: &str, document_content: &str, locale: &Locale) -> Vec<LlmMessage> {
        let system = render(
            &self.templates.summary_answer,
            &[
                ("systemPrompt", &self.system_prompt),
                ("documentUrl", document_url),
                ("documentContent", document_content),
                ("languageInstruction", &locale.language_instruction()),
            ],
        );
        vec![LlmMessage::system(system), LlmMessage::user("Summarize the document above.")]
    }

    fn unclear_intent_messages(&self, user_message: &str, locale: &Locale) -> Vec<LlmMessage> {
        let prompt = render(
            &self.templates.unclear_intent,
            &[("userMessage", user_message), ("languageInstruction", &locale.language_instruction())],
        );
        vec![LlmMessage::user(prompt)]
    }

    fn no_results_messages(&self, user_message: &str, locale: &Locale) -> Vec<LlmMessage> {
        let prompt = render(
            &self.templates.no_results,
            &[("userMessage", user_message), ("languageInstruction", &locale.language_instruction())],
        );
        vec![LlmMessage::user(prompt)]
    }

    fn document_not_found_messages(&self, document_url: &str, locale: &Locale) -> Vec<LlmMessage> {
        let prompt = render(
            &self.templates.document_not_found,
            &[("documentUrl", document_url), ("languageInstruction", &locale.language_instruction())],
        );
        vec![LlmMessage::user(prompt)]
    }

    fn direct_answer_messages(&self, user_message: &str, locale: &Locale) -> Vec<LlmMessage> {
        let prompt = render(
            &self.templates.direct_answer,
            &[
                ("systemPrompt", &self.system_prompt),
                ("userMessage", user_message),
                ("languageInstruction", &locale.language_instruction()),
            ],
        );
        vec![LlmMessage::user(prompt)]
    }

    pub async fn generate_faq_answer(
        &self,
        user_message: &str,
        documents: &[Document],
        history: &[ChatMessage],
        locale: &Locale,
    ) -> Result<LlmChatResponse, LlmError> {
        let messages = self.faq_messages(documents, history, user_message, locale);
        self.backend.chat(&self.base_request(messages)).await
    }

    pub async fn generate_summary(
        &self,
        document_url: &str,
        document_content: &str,
        locale: &Locale,
    ) -> Result<LlmChatResponse, LlmError> {
        let messages = self.summary_messages(document_url, document_content, locale);
        self.backend.chat(&self.base_request(messages)).await
    }

    pub async fn generate_unclear_intent_response(
        &self,
        user_message: &str,
        locale: &Locale,
    ) -> Result<LlmChatResponse, LlmError> {
        let messages = self.unclear_intent_messages(user_message, locale);
        self.backend.chat(&self.base_request(messages)).await
    }

    pub async fn generate_no_results_response(
        &self,
        user_message: &str,
        locale: &Locale,
    ) -> Result<LlmChatResponse, LlmError> {
        let messages = self.no_results_messages(user_message, locale);
        self.backend.chat(&self.base_request(messages)).await
    }

    pub async fn generate_document_not_found_response(
        &self,
        document_url: &str,
        locale: &Locale,
    ) -> Result<LlmChatResponse, LlmError> {
        let messages = self.document_not_found_messages(document_url, locale);
        self.backend.chat(&self.base_request(messages)).await
    }

    pub async fn generate_direct_answer(
        &self,
        user_message: &str,
        locale: &Locale,
    ) -> Result<LlmChatResponse, LlmError> {
        let messages = self.direct_answer_messages(user_message, locale);
        self.backend.chat(&self.base_request(messages)).await
    }

    /// Streaming counterpart to [`Self::generate_answer`]. Forwards each
    /// token to `sink` as it arrives and returns the accumulated response.
    pub async fn stream_generate_answer(
        &self,
        user_message: &str,
        documents: &[Document],
        history: &[ChatMessage],
        locale: &Locale,
        sink: &dyn PhaseSink,
    ) -> Result<LlmChatResponse, LlmError> {
        let context = build_context(documents, self.context_max_chars);
        let messages = self.answer_messages(&self.templates.generate_answer, &context, history, user_message, locale);
        self.stream_with_sink(messages, sink).await
    }

    pub async fn stream_generate_faq_answer(
        &self,
        user_message: &str,
        documents: &[Document],
        history: &[ChatMessage],
        locale: &Locale,
        sink: &dyn PhaseSink,
    ) -> Result<LlmChatResponse, LlmError> {
        let messages = self.faq_messages(documents, history, user_message, locale);
        self.stream_with_sink(messages, sink).await
    }

    pub async fn stream_generate_summary(
        &self,
        document_url: &str,
        document_content: &str,
        locale: &Locale,
        sink: &dyn PhaseSink,
    ) -> Result<LlmChatResponse, LlmError> {
        let messages = self.summary_messages(document_url, document_content, locale);
        self.stream_with_sink(messages, sink).await
    }

    pub async fn stream_generate_unclear_intent_response(
        &self,
        user_message: &str,
        locale: &Locale,
        sink: &dyn PhaseSink,
    ) -> Result<LlmChatResponse, LlmError> {
        let messages = self.unclear_intent_messages(user_message, locale);
        self.stream_with_sink(messages, sink).await
    }

    pub async fn stream_generate_no_results_response(
        &self,
        user_message: &str,
        locale: &Locale,
        sink: &dyn PhaseSink,
    ) -> Result<LlmChatResponse, LlmError> {
        let messages = self.no_results_messages(user_message, locale);
        self.stream_with_sink(messages, sink).await
    }

    pub async fn stream_generate_document_not_found_response(
        &self,
        document_url: &str,
        locale: &Locale,
        sink: &dyn PhaseSink,
    ) -> Result<LlmChatResponse, LlmError> {
        let messages = self.document_not_found_messages(document_url, locale);
        self.stream_with_sink(messages, sink).await
    }

    async fn stream_with_sink(
        &self,
        messages: Vec<LlmMessage>,
        sink: &dyn PhaseSink,
    ) -> Result<LlmChatResponse, LlmError> {
        let (tx, mut rx) = mpsc::channel::<StreamToken>(32);
        let request = self.base_request(messages);

        let forward = async {
            while let Some(token) = rx.recv().await {
                sink.on_chunk(&token.content, token.done).await;
            }
        };

        let (result, _) = tokio::join!(self.backend.chat_stream(&request, tx), forward);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_replaces_every_occurrence() {
        let out = render("{{a}} and {{a}} again, {{b}}", &[("a", "X"), ("b", "Y")]);
        assert_eq!(out, "X and X again, Y");
    }

    #[test]
    fn render_leaves_unset_placeholders_untouched() {
        let out = render("{{a}} {{b}}", &[("a", "X")]);
        assert_eq!(out, "X {{b}}");
    }

    #[test]
    fn build_context_falls_back_to_content_description() {
        let mut doc = Document::new();
        doc.insert("title".to_string(), "Doc".to_string());
        doc.insert("url".to_string(), "https://x".to_string());
        doc.insert("content_description".to_string(), "a summary".to_string());

        let block = build_context(&[doc], 10_000);
        assert_eq!(block.trim(), "[1] Doc / https://x / a summary");
    }

    #[test]
    fn build_context_truncates_with_ellipsis() {
        let mut doc = Document::new();
        doc.insert("content".to_string(), "x".repeat(100));
        let block = build_context(&[doc], 20);
        assert!(block.ends_with("..."));
        assert_eq!(block.chars().count(), 23);
    }

    #[test]
    fn format_hits_numbers_from_one() {
        let mut doc1 = Document::new();
        doc1.insert("title".to_string(), "First".to_string());
        let mut doc2 = Document::new();
        doc2.insert("title".to_string(), "Second".to_string());

        let formatted = format_hits_for_evaluation(&[doc1, doc2]);
        assert!(formatted.starts_with("[1] Title: First"));
        assert!(formatted.contains("[2] Title: Second"));
    }
}
