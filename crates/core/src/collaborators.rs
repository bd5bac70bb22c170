//! Traits the pipeline orchestrator depends on but does not implement:
//! full-text search, document fetch-by-id, and markdown rendering.
//!
//! `ragchat-pipeline` is generic over these so the orchestrator's control
//! flow is testable without a real search index or renderer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

/// A search hit or fetched document, represented as a flexible attribute
/// bag rather than a fixed struct so adapters for different document
/// stores don't need a shared schema. Callers read the fields the
/// façade's templates expect: `doc_id`, `title`, `url`, `content`,
/// `content_description`.
pub type Document = BTreeMap<String, String>;

pub fn doc_field<'a>(doc: &'a Document, field: &str) -> Option<&'a str> {
    doc.get(field).map(String::as_str)
}

/// Full-text search over an external index, used for the SEARCH and FAQ
/// intents.
#[async_trait]
pub trait SearchAdapter: Send + Sync {
    async fn search(&self, query: &str, max_docs: usize) -> Result<Vec<Document>>;
}

/// Fetches full document content, used by the SUMMARY intent (single URL)
/// and the SEARCH/FAQ intents (batched by id).
#[async_trait]
pub trait DocumentFetch: Send + Sync {
    /// Fetches one document by URL, used for the SUMMARY intent.
    async fn fetch_by_url(&self, url: &str) -> Result<Option<Document>>;

    /// Fetches the full content of several hits by id in one call, used
    /// for the SEARCH/FAQ full-fetch step. `fields` is an optional
    /// projection (e.g. `rag_chat.content_fields`) the adapter may use to
    /// limit what it returns per document.
    ///
    /// Returns exactly one entry per `doc_ids`, in the same order;
    /// an entry is `None` when that id could not be found. The default
    /// implementation falls back to one [`Self::fetch_by_url`] call per
    /// id for adapters with no batched path of their own.
    async fn fetch_by_ids(&self, doc_ids: &[String], fields: Option<&[String]>) -> Result<Vec<Option<Document>>> {
        let _ = fields;
        let mut docs = Vec::with_capacity(doc_ids.len());
        for id in doc_ids {
            docs.push(self.fetch_by_url(id).await?);
        }
        Ok(docs)
    }
}

/// Renders assistant markdown into the `html_content` carried alongside
/// each `ChatMessage`.
#[async_trait]
pub trait MarkdownRenderer: Send + Sync {
    async fn render(&self, markdown: &str) -> Result<String>;
}

/// A `MarkdownRenderer` that HTML-escapes its input verbatim, for callers
/// that have no real renderer wired in yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct EscapingRenderer;

#[async_trait]
impl MarkdownRenderer for EscapingRenderer {
    async fn render(&self, markdown: &str) -> Result<String> {
        Ok(html_escape(markdown))
    }
}

pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// A search hit carried through the orchestrator alongside its original
/// 1-based position, used to map relevance indexes back to documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub index: usize,
    pub document: Document,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html_special_characters() {
        assert_eq!(html_escape("<b>a & b</b>"), "&lt;b&gt;a &amp; b&lt;/b&gt;");
    }
}
