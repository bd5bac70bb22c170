//! HTTP/SSE entry point for the RAG chat orchestrator.

pub mod http;
pub mod state;

pub use http::create_router;
pub use state::AppState;
