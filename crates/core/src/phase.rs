//! The pipeline's progress-reporting seam.
//!
//! The orchestrator drives five phases per turn (intent, search, evaluate,
//! fetch, answer) and reports progress through a `PhaseSink` so a caller —
//! typically the SSE handler in `ragchat-server` — can forward status events
//! and answer tokens to the client as they happen, rather than buffering the
//! whole turn.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One stage of the chat turn state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseTag {
    Intent,
    Search,
    Evaluate,
    Fetch,
    Answer,
}

impl PhaseTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseTag::Intent => "intent",
            PhaseTag::Search => "search",
            PhaseTag::Evaluate => "evaluate",
            PhaseTag::Fetch => "fetch",
            PhaseTag::Answer => "answer",
        }
    }
}

impl std::fmt::Display for PhaseTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink the orchestrator reports turn progress to.
///
/// Implementations must not block the orchestrator for long — the answer
/// phase calls `on_chunk` once per streamed token.
#[async_trait]
pub trait PhaseSink: Send + Sync {
    /// A phase has started. `detail` is a short human-readable status line
    /// (e.g. the detected search query, or the number of hits found).
    async fn on_phase_start(&self, tag: PhaseTag, detail: Option<&str>);

    /// A phase finished without error.
    async fn on_phase_complete(&self, tag: PhaseTag);

    /// A token (or token fragment) of the answer phase's streamed output.
    /// `done` is `true` on the final call, at which point `chunk` may be
    /// empty.
    async fn on_chunk(&self, chunk: &str, done: bool);

    /// A phase failed; the orchestrator falls back or aborts the turn
    /// depending on which phase this was (see the orchestrator's module
    /// docs for the fallback table).
    async fn on_error(&self, tag: PhaseTag, message: &str);
}

/// A `PhaseSink` that discards every event. Useful for tests and for
/// programmatic (non-streaming) callers that only want the final
/// `ChatMessage`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl PhaseSink for NullSink {
    async fn on_phase_start(&self, _tag: PhaseTag, _detail: Option<&str>) {}
    async fn on_phase_complete(&self, _tag: PhaseTag) {}
    async fn on_chunk(&self, _chunk: &str, _done: bool) {}
    async fn on_error(&self, _tag: PhaseTag, _message: &str) {}
}
