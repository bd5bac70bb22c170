//! Core traits and types shared by the RAG chat orchestrator crates.
//!
//! This crate has no business logic of its own — it's the vocabulary the
//! `ragchat-llm`, `ragchat-session`, `ragchat-pipeline`, and `ragchat-server`
//! crates share so they don't depend on each other directly.

pub mod chat;
pub mod collaborators;
pub mod error;
pub mod llm_types;
pub mod phase;
pub mod results;

pub use chat::{ChatMessage, ChatRole, ChatSession, ChatSource};
pub use collaborators::{
    doc_field, html_escape, Document, DocumentFetch, EscapingRenderer, IndexedDocument,
    MarkdownRenderer, SearchAdapter,
};
pub use error::{RagChatError, Result};
pub use llm_types::{FinishReason, LlmChatRequest, LlmChatResponse, LlmMessage, LlmRole};
pub use phase::{NullSink, PhaseSink, PhaseTag};
pub use results::{
    BackendAvailability, Intent, IntentDetectionResult, Locale, RelevanceEvaluationResult,
};
