//! End-to-end orchestrator scenarios against in-process fakes: a scripted
//! LLM backend, a fixed search adapter, a map-backed document fetcher, and
//! the core crate's escaping markdown renderer.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ragchat_core::{
    ChatMessage, Document, DocumentFetch, EscapingRenderer, FinishReason, Locale, PhaseSink,
    PhaseTag, Result, SearchAdapter,
};
use ragchat_llm::backend::{LlmBackend, StreamToken};
use ragchat_llm::{BackendRegistry, LlmError, LlmFacade};
use ragchat_pipeline::{Collaborators, Orchestrator, OrchestratorConfig};
use ragchat_session::{InMemorySessionStore, SessionStore};
use tokio::sync::mpsc;

/// Replies to successive `chat`/`chat_stream` calls from a pre-loaded
/// script, in call order. A turn that needs more calls than were scripted
/// panics with a clear message rather than hanging.
struct ScriptedBackend {
    chat_replies: Mutex<VecDeque<String>>,
    stream_replies: Mutex<VecDeque<Vec<&'static str>>>,
}

impl ScriptedBackend {
    fn new() -> Self {
        Self { chat_replies: Mutex::new(VecDeque::new()), stream_replies: Mutex::new(VecDeque::new()) }
    }

    fn with_chat(self, reply: impl Into<String>) -> Self {
        self.chat_replies.lock().unwrap().push_back(reply.into());
        self
    }

    fn with_stream(self, chunks: Vec<&'static str>) -> Self {
        self.stream_replies.lock().unwrap().push_back(chunks);
        self
    }

    fn response(content: String) -> ragchat_core::LlmChatResponse {
        ragchat_core::LlmChatResponse {
            content,
            model: "scripted".to_string(),
            finish_reason: FinishReason::Stop,
            prompt_tokens: Some(0),
            completion_tokens: Some(0),
        }
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn chat(&self, _request: &ragchat_core::LlmChatRequest) -> std::result::Result<ragchat_core::LlmChatResponse, LlmError> {
        let reply = self.chat_replies.lock().unwrap().pop_front().expect("scripted backend ran out of chat replies");
        Ok(Self::response(reply))
    }

    async fn chat_stream(
        &self,
        _request: &ragchat_core::LlmChatRequest,
        tx: mpsc::Sender<StreamToken>,
    ) -> std::result::Result<ragchat_core::LlmChatResponse, LlmError> {
        let chunks = self.stream_replies.lock().unwrap().pop_front().expect("scripted backend ran out of stream replies");
        let mut full = String::new();
        for chunk in &chunks {
            full.push_str(chunk);
            tx.send(StreamToken::chunk(*chunk)).await.expect("sink receiver dropped early");
        }
        tx.send(StreamToken::terminal()).await.expect("sink receiver dropped early");
        Ok(Self::response(full))
    }

    async fn check_availability(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Returns the same fixed set of hits for every query, matching what
/// every scenario below needs: at most one `search` call per turn.
struct FixedSearchAdapter(Vec<Document>);

#[async_trait]
impl SearchAdapter for FixedSearchAdapter {
    async fn search(&self, _query: &str, _max_docs: usize) -> Result<Vec<Document>> {
        Ok(self.0.clone())
    }
}

struct MapDocumentFetch(HashMap<String, Document>);

#[async_trait]
impl DocumentFetch for MapDocumentFetch {
    async fn fetch_by_url(&self, url: &str) -> Result<Option<Document>> {
        Ok(self.0.get(url).cloned())
    }
}

fn doc(fields: &[(&str, &str)]) -> Document {
    fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Records every event the orchestrator reports, in order, for assertions
/// on phase sequencing and the streamed-chunk shape.
#[derive(Default)]
struct CapturingSink {
    events: Mutex<Vec<String>>,
    chunks: Mutex<Vec<(String, bool)>>,
}

#[async_trait]
impl PhaseSink for CapturingSink {
    async fn on_phase_start(&self, tag: PhaseTag, _detail: Option<&str>) {
        self.events.lock().unwrap().push(format!("start:{tag}"));
    }
    async fn on_phase_complete(&self, tag: PhaseTag) {
        self.events.lock().unwrap().push(format!("complete:{tag}"));
    }
    async fn on_chunk(&self, chunk: &str, done: bool) {
        self.chunks.lock().unwrap().push((chunk.to_string(), done));
    }
    async fn on_error(&self, tag: PhaseTag, message: &str) {
        self.events.lock().unwrap().push(format!("error:{tag}:{message}"));
    }
}

fn build_orchestrator(
    backend: ScriptedBackend,
    search: Vec<Document>,
    fetch: HashMap<String, Document>,
) -> Orchestrator {
    let backend: Arc<dyn LlmBackend> = Arc::new(backend);
    let registry = Arc::new(BackendRegistry::with_backend(backend.clone(), true));
    let facade = Arc::new(LlmFacade::new(backend, "You are a support assistant.", 0.3, 512, 4_000, 3));
    let collaborators = Collaborators {
        search: Arc::new(FixedSearchAdapter(search)),
        fetch: Arc::new(MapDocumentFetch(fetch)),
        renderer: Arc::new(EscapingRenderer),
    };
    let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let config = OrchestratorConfig {
        context_max_documents: 5,
        history_max_messages: 20,
        content_fields: vec!["content".to_string()],
    };
    Orchestrator::new(facade, registry, collaborators, sessions, config)
}

fn assistant_text(message: &ChatMessage) -> &str {
    &message.content
}

#[tokio::test]
async fn search_happy_path_cites_fetched_sources() {
    let backend = ScriptedBackend::new()
        .with_chat(r#"{"intent":"search","query":"+Fess +Docker"}"#)
        .with_chat(r#"{"hasRelevantResults":true,"relevantIndexes":[1,3]}"#)
        .with_stream(vec!["Install ", "Fess. "]);

    let hits = vec![
        doc(&[("doc_id", "a"), ("title", "Install Fess"), ("content_description", "install guide")]),
        doc(&[("doc_id", "b"), ("title", "Unrelated")]),
        doc(&[("doc_id", "c"), ("title", "Docker setup"), ("content_description", "docker guide")]),
    ];
    let mut fetched = HashMap::new();
    fetched.insert("a".to_string(), doc(&[("doc_id", "a"), ("title", "Install Fess"), ("content", "full a")]));
    fetched.insert("c".to_string(), doc(&[("doc_id", "c"), ("title", "Docker setup"), ("content", "full c")]));

    let orchestrator = build_orchestrator(backend, hits, fetched);
    let sink = CapturingSink::default();
    let result = orchestrator
        .run_turn(Some("s1"), None, "How to install Fess on Docker", &Locale::english(), &sink)
        .await
        .unwrap();

    assert_eq!(assistant_text(&result), "Install Fess. ");
    assert_eq!(result.sources.len(), 2);
    assert_eq!(result.sources[0].index, 1);
    assert_eq!(result.sources[0].doc_id, "a");
    assert_eq!(result.sources[1].index, 2);
    assert_eq!(result.sources[1].doc_id, "c");

    let events = sink.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "start:intent", "complete:intent",
            "start:search", "complete:search",
            "start:evaluate", "complete:evaluate",
            "start:fetch", "complete:fetch",
            "start:answer", "complete:answer",
        ]
    );

    let chunks = sink.chunks.lock().unwrap().clone();
    assert_eq!(chunks, vec![("Install ".to_string(), false), ("Fess. ".to_string(), false), (String::new(), true)]);
}

#[tokio::test]
async fn unclear_intent_skips_search_and_has_no_sources() {
    let backend = ScriptedBackend::new()
        .with_chat(r#"{"intent":"unclear"}"#)
        .with_stream(vec!["Could ", "you clarify?"]);

    let orchestrator = build_orchestrator(backend, Vec::new(), HashMap::new());
    let sink = CapturingSink::default();
    let result = orchestrator.run_turn(Some("s2"), None, "hello", &Locale::english(), &sink).await.unwrap();

    assert_eq!(assistant_text(&result), "Could you clarify?");
    assert!(result.sources.is_empty());
    assert_eq!(sink.events.lock().unwrap().clone(), vec!["start:intent", "complete:intent", "start:answer", "complete:answer"]);
}

#[tokio::test]
async fn summary_with_url_found_fetches_then_answers() {
    let backend = ScriptedBackend::new()
        .with_chat(r#"{"intent":"summary","documentUrl":"https://x/y"}"#)
        .with_stream(vec!["It ", "covers setup."]);

    let hits = vec![doc(&[("doc_id", "doc1"), ("url", "https://x/y")])];
    let mut fetched = HashMap::new();
    fetched.insert("https://x/y".to_string(), doc(&[("doc_id", "doc1"), ("title", "Doc"), ("content", "full text")]));

    let orchestrator = build_orchestrator(backend, hits, fetched);
    let sink = CapturingSink::default();
    let result = orchestrator.run_turn(Some("s3"), None, "Summarize https://x/y", &Locale::english(), &sink).await.unwrap();

    assert_eq!(assistant_text(&result), "It covers setup.");
    assert_eq!(result.sources.len(), 1);
    assert_eq!(result.sources[0].doc_id, "doc1");
    assert_eq!(
        sink.events.lock().unwrap().clone(),
        vec!["start:intent", "complete:intent", "start:search", "complete:search", "start:fetch", "complete:fetch", "start:answer", "complete:answer"]
    );
}

#[tokio::test]
async fn summary_with_missing_url_reports_not_found() {
    let backend = ScriptedBackend::new()
        .with_chat(r#"{"intent":"summary","documentUrl":"https://x/y"}"#)
        .with_stream(vec!["That ", "document was not found."]);

    let orchestrator = build_orchestrator(backend, Vec::new(), HashMap::new());
    let sink = CapturingSink::default();
    let result = orchestrator.run_turn(Some("s4"), None, "Summarize https://x/y", &Locale::english(), &sink).await.unwrap();

    assert_eq!(assistant_text(&result), "That document was not found.");
    assert!(result.sources.is_empty());
    assert_eq!(
        sink.events.lock().unwrap().clone(),
        vec!["start:intent", "complete:intent", "start:search", "complete:search", "start:answer", "complete:answer"]
    );
}

#[tokio::test]
async fn empty_search_results_skip_evaluation() {
    let backend = ScriptedBackend::new()
        .with_chat(r#"{"intent":"search","query":"warranty period"}"#)
        .with_stream(vec!["No ", "matching results."]);

    let orchestrator = build_orchestrator(backend, Vec::new(), HashMap::new());
    let sink = CapturingSink::default();
    let result = orchestrator.run_turn(Some("s5"), None, "how long is the warranty", &Locale::english(), &sink).await.unwrap();

    assert_eq!(assistant_text(&result), "No matching results.");
    assert_eq!(
        sink.events.lock().unwrap().clone(),
        vec!["start:intent", "complete:intent", "start:search", "complete:search", "start:answer", "complete:answer"]
    );
}

#[tokio::test]
async fn malformed_classifier_response_falls_back_to_search_without_failing_the_turn() {
    let backend = ScriptedBackend::new().with_chat("I cannot classify that.").with_stream(vec!["Here's ", "what I found."]);

    let orchestrator = build_orchestrator(backend, Vec::new(), HashMap::new());
    let sink = CapturingSink::default();
    let result = orchestrator
        .run_turn(Some("s6"), None, "what is the refund window", &Locale::english(), &sink)
        .await
        .expect("a malformed classification must not fail the turn");

    assert_eq!(assistant_text(&result), "Here's what I found.");
    assert_eq!(
        sink.events.lock().unwrap().clone(),
        vec!["start:intent", "complete:intent", "start:search", "complete:search", "start:answer", "complete:answer"]
    );
}

#[tokio::test]
async fn session_history_grows_by_one_turn_and_respects_the_configured_bound() {
    let backend = ScriptedBackend::new()
        .with_chat(r#"{"intent":"unclear"}"#)
        .with_stream(vec!["First reply."])
        .with_chat(r#"{"intent":"unclear"}"#)
        .with_stream(vec!["Second reply."]);

    let backend: Arc<dyn LlmBackend> = Arc::new(backend);
    let registry = Arc::new(BackendRegistry::with_backend(backend.clone(), true));
    let facade = Arc::new(LlmFacade::new(backend, "assistant", 0.3, 512, 4_000, 3));
    let collaborators = Collaborators {
        search: Arc::new(FixedSearchAdapter(Vec::new())),
        fetch: Arc::new(MapDocumentFetch(HashMap::new())),
        renderer: Arc::new(EscapingRenderer),
    };
    let sessions = Arc::new(InMemorySessionStore::new());
    let config = OrchestratorConfig {
        context_max_documents: 5,
        history_max_messages: 2,
        content_fields: vec!["content".to_string()],
    };
    let orchestrator = Orchestrator::new(facade, registry, collaborators, sessions.clone(), config);

    let sink = CapturingSink::default();
    orchestrator.run_turn(Some("s7"), None, "hi", &Locale::english(), &sink).await.unwrap();
    let after_first = sessions.history("s7").await.unwrap();
    assert_eq!(after_first.len(), 2);

    orchestrator.run_turn(Some("s7"), None, "hi again", &Locale::english(), &sink).await.unwrap();
    let after_second = sessions.history("s7").await.unwrap();
    assert_eq!(after_second.len(), 2, "history_max_messages=2 must keep only the latest turn");
}
