//! Drives a RAG chat turn from intent classification through a streamed
//! answer, coordinating the LLM façade, backend registry, session store,
//! and search/fetch/render collaborators.

pub mod orchestrator;

pub use orchestrator::{Collaborators, Orchestrator, OrchestratorConfig};
