//! Error kinds shared across the RAG chat crates.

use thiserror::Error;

/// Errors that can escape the LLM façade, the backend registry, or the
/// pipeline orchestrator.
///
/// Classification failures (intent / relevance JSON that didn't parse) are
/// recovered internally by the façade and never surface here — see
/// `ragchat_llm::facade`.
#[derive(Error, Debug)]
pub enum RagChatError {
    /// Missing or invalid backend configuration (API key, URL, model).
    #[error("configuration error: {0}")]
    Config(String),

    /// Network failure, timeout, or non-2xx response from an LLM backend.
    #[error("transport error: {0}")]
    Transport(String),

    /// A backend response frame could not be parsed as the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No backend is configured, or the configured one is unreachable.
    #[error("no rag chat backend available")]
    Unavailable,

    /// The search, fetch, or markdown-render collaborator failed.
    #[error("collaborator error: {0}")]
    Collaborator(String),
}

pub type Result<T> = std::result::Result<T, RagChatError>;
