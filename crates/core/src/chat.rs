//! Session-visible chat history: the turns a user actually sees, as
//! opposed to the internal LLM prompts built from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// A document cited by an assistant turn, carried alongside the message so
/// the UI can render `[doc_id a,b,c]`-style references as links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSource {
    /// 1-based index as it appeared in the answer prompt's numbered hit list.
    pub index: usize,
    pub doc_id: String,
    pub title: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Rendered HTML for assistant turns (markdown rendered via the
    /// `MarkdownRenderer` collaborator); `None` for user turns.
    pub html_content: Option<String>,
    pub sources: Vec<ChatSource>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            html_content: None,
            sources: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, html_content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            html_content: Some(html_content.into()),
            sources: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<ChatSource>) -> Self {
        self.sources = sources;
        self
    }
}

/// A single chat session's history plus bookkeeping, owned by the session
/// store (`ragchat_session::SessionStore`).
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub session_id: String,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(session_id: impl Into<String>, user_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id,
            created_at: now,
            last_activity_at: now,
            messages: Vec::new(),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Appends a completed user/assistant exchange and bumps the activity
    /// timestamp used for idle eviction.
    pub fn push_turn(&mut self, user: ChatMessage, assistant: ChatMessage) {
        self.messages.push(user);
        self.messages.push(assistant);
        self.last_activity_at = Utc::now();
    }

    /// Drops the oldest turns until at most `max_messages` remain.
    ///
    /// Turns are dropped as whole user/assistant pairs so the history never
    /// starts mid-turn. Calling this repeatedly with the same bound is a
    /// no-op once the target is reached.
    pub fn trim_history(&mut self, max_messages: usize) {
        while self.messages.len() > max_messages && self.messages.len() >= 2 {
            self.messages.drain(0..2);
        }
        if self.messages.len() > max_messages {
            self.messages.remove(0);
        }
    }

    pub fn is_idle_since(&self, now: DateTime<Utc>, idle_timeout: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_activity_at) > idle_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn() -> (ChatMessage, ChatMessage) {
        (ChatMessage::user("hi"), ChatMessage::assistant("hello", "<p>hello</p>"))
    }

    #[test]
    fn trim_history_keeps_pairs_aligned() {
        let mut session = ChatSession::new("s1", None);
        for _ in 0..5 {
            let (u, a) = turn();
            session.push_turn(u, a);
        }
        assert_eq!(session.messages().len(), 10);

        session.trim_history(4);
        assert_eq!(session.messages().len(), 4);
        assert!(matches!(session.messages()[0].role, ChatRole::User));
    }

    #[test]
    fn trim_history_is_idempotent() {
        let mut session = ChatSession::new("s1", None);
        for _ in 0..3 {
            let (u, a) = turn();
            session.push_turn(u, a);
        }
        session.trim_history(4);
        let len_after_first = session.messages().len();
        session.trim_history(4);
        assert_eq!(session.messages().len(), len_after_first);
    }

    #[test]
    fn trim_history_noop_when_under_limit() {
        let mut session = ChatSession::new("s1", None);
        let (u, a) = turn();
        session.push_turn(u, a);
        session.trim_history(10);
        assert_eq!(session.messages().len(), 2);
    }
}
