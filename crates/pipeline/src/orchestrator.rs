//! Drives one chat turn through the five-phase state machine: intent,
//! then either an immediate answer, a URL-fetch-summary path, or a
//! search-evaluate-fetch-answer path.
//!
//! ```text
//!             ┌──► UNCLEAR_ANSWER ──┐
//! INTENT ─────┼──► URL_SEARCH ──► FETCH ──► SUMMARY_ANSWER ──┐
//!             │                └► NOT_FOUND_ANSWER ─────────┤
//!             └──► SEARCH ──► (empty?) ── NO_RESULTS_ANSWER ─┤
//!                         └► EVALUATE ── (none?) ── NO_RESULTS_ANSWER ─┤
//!                                    └► FETCH ──► FAQ_ANSWER / ANSWER ─┤
//!                                                                      └► ANSWERED
//! ```

use std::sync::Arc;

use ragchat_core::{
    ChatMessage, ChatSource, Document, Intent, Locale, PhaseSink, PhaseTag, RagChatError, Result,
    SearchAdapter,
};
use ragchat_llm::{BackendRegistry, LlmFacade};
use ragchat_session::SessionStore;

/// Read-only collaborators the orchestrator calls into but does not
/// implement: full-text search, document fetch, markdown rendering.
pub struct Collaborators {
    pub search: Arc<dyn SearchAdapter>,
    pub fetch: Arc<dyn ragchat_core::DocumentFetch>,
    pub renderer: Arc<dyn ragchat_core::MarkdownRenderer>,
}

pub struct OrchestratorConfig {
    pub context_max_documents: usize,
    pub history_max_messages: usize,
    /// Field projection passed to `DocumentFetch::fetch_by_ids`, e.g.
    /// `rag_chat.content_fields`. Empty means "no projection requested".
    pub content_fields: Vec<String>,
}

pub struct Orchestrator {
    facade: Arc<LlmFacade>,
    registry: Arc<BackendRegistry>,
    collaborators: Collaborators,
    sessions: Arc<dyn SessionStore>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        facade: Arc<LlmFacade>,
        registry: Arc<BackendRegistry>,
        collaborators: Collaborators,
        sessions: Arc<dyn SessionStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self { facade, registry, collaborators, sessions, config }
    }

    /// Runs one full turn: classifies intent, searches/fetches as needed,
    /// streams the answer to `sink`, then persists the turn. On any
    /// collaborator or backend failure the session is left untouched and
    /// the error is reported to `sink` once before being returned.
    pub async fn run_turn(
        &self,
        session_id: Option<&str>,
        user_id: Option<String>,
        user_message: &str,
        locale: &Locale,
        sink: &dyn PhaseSink,
    ) -> Result<ChatMessage> {
        if !self.registry.available() {
            return Err(RagChatError::Unavailable);
        }

        let session = self.sessions.get_or_create(session_id, user_id).await;
        let history = session.messages().to_vec();

        sink.on_phase_start(PhaseTag::Intent, None).await;
        let intent = self.facade.detect_intent(user_message).await;
        sink.on_phase_complete(PhaseTag::Intent).await;

        let outcome = match intent.intent() {
            Intent::Unclear => self.run_unclear(user_message, locale, sink).await,
            Intent::Summary => {
                let url = intent.document_url().unwrap_or_default();
                self.run_summary(url, locale, sink).await
            }
            Intent::Search | Intent::Faq => {
                let query = effective_query(intent.query(), user_message);
                let is_faq = intent.intent() == Intent::Faq;
                self.run_search(user_message, query, is_faq, &history, locale, sink).await
            }
        };

        let (text, sources) = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                sink.on_error(PhaseTag::Answer, &e.to_string()).await;
                return Err(e);
            }
        };

        let html = self.collaborators.renderer.render(&text).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "markdown render failed, falling back to escaped text");
            ragchat_core::html_escape(&text)
        });
        let assistant = ChatMessage::assistant(text, html).with_sources(sources);

        let stored = self
            .sessions
            .push_turn(
                &session.session_id,
                ChatMessage::user(user_message),
                assistant.clone(),
                self.config.history_max_messages,
            )
            .await;
        if !stored {
            tracing::warn!(session_id = %session.session_id, "session vanished before turn could be persisted");
        }

        Ok(assistant)
    }

    async fn run_unclear(
        &self,
        user_message: &str,
        locale: &Locale,
        sink: &dyn PhaseSink,
    ) -> Result<(String, Vec<ChatSource>)> {
        sink.on_phase_start(PhaseTag::Answer, Some("unclear intent")).await;
        let response = self.facade.stream_generate_unclear_intent_response(user_message, locale, sink).await?;
        sink.on_phase_complete(PhaseTag::Answer).await;
        Ok((response.content, Vec::new()))
    }

    async fn run_summary(
        &self,
        url: &str,
        locale: &Locale,
        sink: &dyn PhaseSink,
    ) -> Result<(String, Vec<ChatSource>)> {
        let exact_query = format!("url:\"{url}\"");
        sink.on_phase_start(PhaseTag::Search, Some(&exact_query)).await;
        let hits = self.collaborators.search.search(&exact_query, 1).await?;
        sink.on_phase_complete(PhaseTag::Search).await;

        if hits.is_empty() {
            return self.run_not_found(url, locale, sink).await;
        }

        sink.on_phase_start(PhaseTag::Fetch, None).await;
        let full = self.collaborators.fetch.fetch_by_url(url).await?;
        sink.on_phase_complete(PhaseTag::Fetch).await;

        let Some(full) = full else { return self.run_not_found(url, locale, sink).await };
        let content = doc_text(&full);
        let title = full.get("title").cloned();

        sink.on_phase_start(PhaseTag::Answer, Some("summary")).await;
        let response = self.facade.stream_generate_summary(url, &content, locale, sink).await?;
        sink.on_phase_complete(PhaseTag::Answer).await;

        let source = ChatSource { index: 1, doc_id: doc_id_of(&full, url), title, url: Some(url.to_string()) };
        Ok((response.content, vec![source]))
    }

    async fn run_not_found(
        &self,
        url: &str,
        locale: &Locale,
        sink: &dyn PhaseSink,
    ) -> Result<(String, Vec<ChatSource>)> {
        sink.on_phase_start(PhaseTag::Answer, Some("document not found")).await;
        let response = self.facade.stream_generate_document_not_found_response(url, locale, sink).await?;
        sink.on_phase_complete(PhaseTag::Answer).await;
        Ok((response.content, Vec::new()))
    }

    async fn run_no_results(
        &self,
        user_message: &str,
        locale: &Locale,
        sink: &dyn PhaseSink,
    ) -> Result<(String, Vec<ChatSource>)> {
        sink.on_phase_start(PhaseTag::Answer, Some("no results")).await;
        let response = self.facade.stream_generate_no_results_response(user_message, locale, sink).await?;
        sink.on_phase_complete(PhaseTag::Answer).await;
        Ok((response.content, Vec::new()))
    }

    async fn run_search(
        &self,
        user_message: &str,
        query: &str,
        is_faq: bool,
        history: &[ChatMessage],
        locale: &Locale,
        sink: &dyn PhaseSink,
    ) -> Result<(String, Vec<ChatSource>)> {
        sink.on_phase_start(PhaseTag::Search, Some(query)).await;
        let hits = self.collaborators.search.search(query, self.config.context_max_documents).await?;
        sink.on_phase_complete(PhaseTag::Search).await;

        if hits.is_empty() {
            return self.run_no_results(user_message, locale, sink).await;
        }

        sink.on_phase_start(PhaseTag::Evaluate, None).await;
        let relevance = self.facade.evaluate_results(user_message, query, &hits).await;
        sink.on_phase_complete(PhaseTag::Evaluate).await;

        if !relevance.has_relevant_results {
            return self.run_no_results(user_message, locale, sink).await;
        }

        sink.on_phase_start(PhaseTag::Fetch, None).await;
        let doc_ids: Vec<String> =
            relevance.relevant_indexes.iter().map(|&hit_index| doc_id_of(&hits[hit_index - 1], "")).collect();
        let fields = if self.config.content_fields.is_empty() { None } else { Some(self.config.content_fields.as_slice()) };
        let fetched = self.collaborators.fetch.fetch_by_ids(&doc_ids, fields).await?;

        let mut relevant_docs = Vec::with_capacity(relevance.relevant_indexes.len());
        let mut sources = Vec::with_capacity(relevance.relevant_indexes.len());
        for (position, (&hit_index, fetched_doc)) in relevance.relevant_indexes.iter().zip(fetched).enumerate() {
            let hit = &hits[hit_index - 1];
            let doc_id = doc_id_of(hit, "");
            let doc = fetched_doc.unwrap_or_else(|| hit.clone());
            sources.push(ChatSource {
                index: position + 1,
                doc_id: doc_id.clone(),
                title: doc.get("title").cloned(),
                url: doc.get("url").cloned(),
            });
            relevant_docs.push(doc);
        }
        sink.on_phase_complete(PhaseTag::Fetch).await;

        sink.on_phase_start(PhaseTag::Answer, Some(if is_faq { "faq" } else { "answer" })).await;
        let response = if is_faq {
            self.facade.stream_generate_faq_answer(user_message, &relevant_docs, history, locale, sink).await?
        } else {
            self.facade.stream_generate_answer(user_message, &relevant_docs, history, locale, sink).await?
        };
        sink.on_phase_complete(PhaseTag::Answer).await;

        Ok((response.content, sources))
    }
}

fn effective_query<'a>(intent_query: Option<&'a str>, user_message: &'a str) -> &'a str {
    match intent_query {
        Some(q) if !q.trim().is_empty() => q,
        _ => user_message,
    }
}

fn doc_id_of(doc: &Document, fallback: &str) -> String {
    doc.get("doc_id").cloned().unwrap_or_else(|| fallback.to_string())
}

fn doc_text(doc: &Document) -> String {
    doc.get("content").or_else(|| doc.get("content_description")).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_query_prefers_non_blank_intent_query() {
        assert_eq!(effective_query(Some("return policy"), "what's your policy"), "return policy");
    }

    #[test]
    fn effective_query_falls_back_to_user_message_when_blank() {
        assert_eq!(effective_query(Some("   "), "what's your policy"), "what's your policy");
        assert_eq!(effective_query(None, "what's your policy"), "what's your policy");
    }
}
