//! HTTP transport for the RAG chat orchestrator.
//!
//! Ships exactly two routes: a `POST /api/chat/:session_id/stream` that
//! frames one chat turn as a browser Server-Sent-Events stream, and a
//! `/health` liveness check. This is a demonstration wiring only — no
//! authentication, CORS policy, or rate limiting is implemented here; a
//! real deployment puts those in front of this crate rather than inside it.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use ragchat_core::{Locale, PhaseSink, PhaseTag};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat/:session_id/stream", post(stream_chat))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct LocaleDto {
    tag: String,
    display_name: String,
}

impl From<LocaleDto> for Locale {
    fn from(dto: LocaleDto) -> Self {
        Locale::new(dto.tag, dto.display_name)
    }
}

#[derive(Debug, Deserialize)]
struct ChatStreamRequest {
    message: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    locale: Option<LocaleDto>,
}

/// Forwards orchestrator progress as named SSE events, one `tokio::spawn`ed
/// turn at a time. Dropped (and the stream closed) once `run_turn` returns.
struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

fn send_event(tx: &mpsc::UnboundedSender<Event>, name: &str, data: serde_json::Value) {
    match Event::default().event(name).json_data(data) {
        Ok(event) => {
            let _ = tx.send(event);
        }
        Err(e) => tracing::warn!(error = %e, "failed to encode sse event"),
    }
}

#[async_trait]
impl PhaseSink for ChannelSink {
    async fn on_phase_start(&self, tag: PhaseTag, detail: Option<&str>) {
        send_event(&self.tx, "phase_start", serde_json::json!({ "phase": tag.as_str(), "detail": detail }));
    }

    async fn on_phase_complete(&self, tag: PhaseTag) {
        send_event(&self.tx, "phase_complete", serde_json::json!({ "phase": tag.as_str() }));
    }

    async fn on_chunk(&self, chunk: &str, done: bool) {
        send_event(&self.tx, "chunk", serde_json::json!({ "content": chunk, "done": done }));
    }

    async fn on_error(&self, tag: PhaseTag, message: &str) {
        send_event(&self.tx, "error", serde_json::json!({ "phase": tag.as_str(), "message": message }));
    }
}

async fn stream_chat(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ChatStreamRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let sink = Arc::new(ChannelSink { tx });

    let orchestrator = state.orchestrator.clone();
    let locale = request.locale.map(Locale::from).unwrap_or_default();

    tokio::spawn(async move {
        let outcome = orchestrator
            .run_turn(Some(&session_id), request.user_id, &request.message, &locale, sink.as_ref())
            .await;
        if let Err(e) = outcome {
            tracing::warn!(session_id = %session_id, error = %e, "chat turn did not complete");
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(Ok);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    rag_chat_available: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let available = state.registry.available();
    Json(HealthResponse { status: if available { "ok" } else { "degraded" }, rag_chat_available: available })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragchat_config::RagChatConfig;

    #[tokio::test]
    async fn router_builds_with_demo_state() {
        let state = AppState::with_demo_collaborators(&RagChatConfig::default()).await.unwrap();
        let _ = create_router(state);
    }
}
