//! Thread-safe `sessionId -> ChatSession` map.
//!
//! `SessionStore` is a trait so the pipeline and server crates depend on
//! the abstraction rather than the concrete map; `InMemorySessionStore` is
//! the only implementation this repository ships, matching the teacher's
//! in-memory default with no persistence across restarts.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use ragchat_core::{ChatMessage, ChatSession};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the session for `session_id`, creating one with a
    /// server-chosen opaque id when `session_id` is `None` or unknown.
    async fn get_or_create(&self, session_id: Option<&str>, user_id: Option<String>) -> ChatSession;

    /// The session's current history, or `None` if it doesn't exist.
    async fn history(&self, session_id: &str) -> Option<Vec<ChatMessage>>;

    /// Appends a completed turn and trims history to `max_messages`.
    /// Returns `false` if the session doesn't exist.
    async fn push_turn(
        &self,
        session_id: &str,
        user: ChatMessage,
        assistant: ChatMessage,
        max_messages: usize,
    ) -> bool;

    /// Drops every session whose last activity is older than
    /// `idle_timeout`, returning the number evicted.
    async fn evict_idle(&self, idle_timeout: ChronoDuration) -> usize;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, ChatSession>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, session_id: Option<&str>, user_id: Option<String>) -> ChatSession {
        if let Some(id) = session_id {
            if let Some(existing) = self.sessions.get(id) {
                return existing.clone();
            }
            let session = ChatSession::new(id.to_string(), user_id);
            self.sessions.insert(id.to_string(), session.clone());
            return session;
        }

        let id = Uuid::new_v4().to_string();
        let session = ChatSession::new(id.clone(), user_id);
        self.sessions.insert(id, session.clone());
        session
    }

    async fn history(&self, session_id: &str) -> Option<Vec<ChatMessage>> {
        self.sessions.get(session_id).map(|s| s.messages().to_vec())
    }

    async fn push_turn(
        &self,
        session_id: &str,
        user: ChatMessage,
        assistant: ChatMessage,
        max_messages: usize,
    ) -> bool {
        let Some(mut session) = self.sessions.get_mut(session_id) else { return false };
        session.push_turn(user, assistant);
        session.trim_history(max_messages);
        true
    }

    async fn evict_idle(&self, idle_timeout: ChronoDuration) -> usize {
        let now = Utc::now();
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_idle_since(now, idle_timeout))
            .map(|entry| entry.key().clone())
            .collect();

        for id in &stale {
            self.sessions.remove(id);
        }

        if !stale.is_empty() {
            tracing::info!(count = stale.len(), "evicted idle sessions");
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_allocates_opaque_id_when_none_given() {
        let store = InMemorySessionStore::new();
        let session = store.get_or_create(None, None).await;
        assert!(!session.session_id.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn get_or_create_reuses_known_id() {
        let store = InMemorySessionStore::new();
        let first = store.get_or_create(Some("s1"), None).await;
        let second = store.get_or_create(Some("s1"), None).await;
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn push_turn_trims_to_configured_max() {
        let store = InMemorySessionStore::new();
        store.get_or_create(Some("s1"), None).await;

        for _ in 0..5 {
            let ok = store
                .push_turn(
                    "s1",
                    ChatMessage::user("hi"),
                    ChatMessage::assistant("hello", "<p>hello</p>"),
                    4,
                )
                .await;
            assert!(ok);
        }

        let history = store.history("s1").await.unwrap();
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn push_turn_on_unknown_session_returns_false() {
        let store = InMemorySessionStore::new();
        let ok = store.push_turn("missing", ChatMessage::user("hi"), ChatMessage::assistant("x", "x"), 10).await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn evict_idle_removes_only_stale_sessions() {
        let store = InMemorySessionStore::new();
        store.get_or_create(Some("fresh"), None).await;

        let evicted = store.evict_idle(ChronoDuration::seconds(-1)).await;
        assert_eq!(evicted, 1);
        assert!(store.is_empty());
    }
}
