//! Multi-provider LLM backend drivers and the RAG chat façade.
//!
//! `backend` hides each provider's wire protocol behind one trait,
//! `registry` picks the configured backend and tracks its availability,
//! and `facade` turns that trait into the five RAG-specific primitives
//! (intent detection, relevance evaluation, answer generation, ...).

pub mod backend;
pub mod facade;
pub mod json;
pub mod registry;

pub use backend::{LlmBackend, StreamToken};
pub use facade::LlmFacade;
pub use registry::BackendRegistry;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend returned HTTP {status}: {snippet}")]
    Api { status: u16, snippet: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl LlmError {
    /// Whether another attempt is worth making. Transport failures (DNS,
    /// connect, timeout) and 5xx responses are transient; 4xx responses
    /// and malformed payloads are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Transport(_) => true,
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::Configuration(_) | LlmError::Protocol(_) => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Transport(err.to_string())
    }
}

impl From<LlmError> for ragchat_core::RagChatError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Configuration(msg) => ragchat_core::RagChatError::Config(msg),
            LlmError::Transport(msg) => ragchat_core::RagChatError::Transport(msg),
            LlmError::Api { status, snippet } => {
                ragchat_core::RagChatError::Transport(format!("http {status}: {snippet}"))
            }
            LlmError::Protocol(msg) => ragchat_core::RagChatError::Protocol(msg),
        }
    }
}
