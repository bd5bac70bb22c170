//! Centralized default values for the RAG chat configuration tree.
//!
//! This module only contains generic, domain-agnostic defaults (service
//! endpoints, timeouts, RAG chat tuning knobs). Anything specific to a
//! deployment belongs in `config/default.{toml,yaml}`, not here.

/// Default backend endpoints (overridable at call time via env vars).
pub mod endpoints {
    use once_cell::sync::Lazy;

    pub static OLLAMA_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434".to_string())
    });

    pub static OPENAI_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("OPENAI_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
    });

    pub static GEMINI_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("GEMINI_API_BASE")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string())
    });
}

/// RAG chat tuning defaults.
pub mod rag_chat {
    pub const TEMPERATURE: f32 = 0.7;
    pub const MAX_TOKENS: u32 = 1024;
    pub const CONTEXT_MAX_DOCUMENTS: usize = 10;
    pub const CONTEXT_MAX_CHARS: usize = 8_000;
    pub const EVALUATION_MAX_RELEVANT_DOCS: usize = 5;
    pub const HISTORY_MAX_MESSAGES: usize = 20;
    pub const AVAILABILITY_CHECK_INTERVAL_SECS: i64 = 60;
    pub const BACKEND_TIMEOUT_SECS: u64 = 30;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rag_chat_defaults_are_sane() {
        assert!(rag_chat::TEMPERATURE >= 0.0 && rag_chat::TEMPERATURE <= 2.0);
        assert!(rag_chat::MAX_TOKENS > 0);
        assert!(rag_chat::CONTEXT_MAX_DOCUMENTS > 0);
    }
}
