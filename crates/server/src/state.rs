//! Shared application state: wires the backend registry, the LLM façade,
//! the session store, and the search/fetch/render collaborators into one
//! [`Orchestrator`].
//!
//! The search and document-fetch collaborators are the named external
//! transport's responsibility (see the module docs on [`create_router`] in
//! `http.rs`); this crate ships inert stand-ins so the server boots and
//! answers "no results"/"not found" without a real index wired in.

use std::sync::Arc;

use async_trait::async_trait;
use ragchat_config::RagChatConfig;
use ragchat_core::{Document, DocumentFetch, EscapingRenderer, MarkdownRenderer, Result, SearchAdapter};
use ragchat_llm::backend::LlmBackend;
use ragchat_llm::{BackendRegistry, LlmError, LlmFacade};
use ragchat_pipeline::{Collaborators, Orchestrator, OrchestratorConfig};
use ragchat_session::{InMemorySessionStore, SessionStore};

/// A backend stand-in used when `rag_chat.enabled` is false or `llm_type`
/// is `none`. `BackendRegistry::available()` is always false in that case,
/// so the orchestrator never reaches this backend's methods — it exists
/// only so [`LlmFacade`] always has something to hold.
struct UnconfiguredBackend;

#[async_trait]
impl LlmBackend for UnconfiguredBackend {
    async fn chat(&self, _request: &ragchat_core::LlmChatRequest) -> std::result::Result<ragchat_core::LlmChatResponse, LlmError> {
        Err(LlmError::Configuration("no rag chat backend configured".to_string()))
    }

    async fn chat_stream(
        &self,
        _request: &ragchat_core::LlmChatRequest,
        _tx: tokio::sync::mpsc::Sender<ragchat_llm::backend::StreamToken>,
    ) -> std::result::Result<ragchat_core::LlmChatResponse, LlmError> {
        Err(LlmError::Configuration("no rag chat backend configured".to_string()))
    }

    async fn check_availability(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// A search adapter that finds nothing. Demonstration default only.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptySearchAdapter;

#[async_trait]
impl SearchAdapter for EmptySearchAdapter {
    async fn search(&self, _query: &str, _max_docs: usize) -> Result<Vec<Document>> {
        Ok(Vec::new())
    }
}

/// A document fetcher that never finds the requested URL. Demonstration
/// default only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneDocumentFetch;

#[async_trait]
impl DocumentFetch for NoneDocumentFetch {
    async fn fetch_by_url(&self, _url: &str) -> Result<Option<Document>> {
        Ok(None)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<BackendRegistry>,
}

impl AppState {
    /// Builds the full dependency graph for one process: backend registry
    /// (with its first synchronous probe and periodic refresh task),
    /// façade, in-memory session store, and whichever search/fetch
    /// collaborators the caller supplies.
    pub async fn new(
        rag_chat: &RagChatConfig,
        search: Arc<dyn SearchAdapter>,
        fetch: Arc<dyn DocumentFetch>,
    ) -> std::result::Result<Self, LlmError> {
        let registry = Arc::new(BackendRegistry::new(rag_chat).await?);
        registry.spawn_periodic_refresh(rag_chat.availability_check_interval_secs);

        let backend: Arc<dyn LlmBackend> =
            registry.active().cloned().unwrap_or_else(|| Arc::new(UnconfiguredBackend));

        let system_prompt = rag_chat.system_prompt.clone().unwrap_or_default();
        let facade = Arc::new(LlmFacade::new(
            backend,
            system_prompt,
            rag_chat.temperature,
            rag_chat.max_tokens,
            rag_chat.context_max_chars,
            rag_chat.evaluation_max_relevant_docs,
        ));

        let renderer: Arc<dyn MarkdownRenderer> = Arc::new(EscapingRenderer);
        let collaborators = Collaborators { search, fetch, renderer };
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let config = OrchestratorConfig {
            context_max_documents: rag_chat.context_max_documents,
            history_max_messages: rag_chat.history_max_messages,
            content_fields: rag_chat.content_fields.clone(),
        };

        let orchestrator = Arc::new(Orchestrator::new(facade, registry.clone(), collaborators, sessions, config));

        Ok(Self { orchestrator, registry })
    }

    /// Builds state with the demonstration search/fetch stand-ins, for the
    /// binary entry point and for tests that only exercise routing.
    pub async fn with_demo_collaborators(rag_chat: &RagChatConfig) -> std::result::Result<Self, LlmError> {
        Self::new(rag_chat, Arc::new(EmptySearchAdapter), Arc::new(NoneDocumentFetch)).await
    }
}
