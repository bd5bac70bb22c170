//! Classification outputs produced by the LLM façade's RAG primitives.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Search,
    Faq,
    Summary,
    Unclear,
}

/// The outcome of `detectIntent`.
///
/// Each variant carries exactly the fields its intent requires —
/// `query` for `Search`/`Faq`, `document_url` for `Summary`, nothing extra
/// for `Unclear` — so a caller can't observe an inconsistent combination
/// (e.g. a `Summary` with no URL).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "lowercase")]
pub enum IntentDetectionResult {
    Search { query: String, reasoning: Option<String> },
    Faq { query: String, reasoning: Option<String> },
    Summary { document_url: String, reasoning: Option<String> },
    Unclear { reasoning: Option<String> },
}

impl IntentDetectionResult {
    pub fn intent(&self) -> Intent {
        match self {
            IntentDetectionResult::Search { .. } => Intent::Search,
            IntentDetectionResult::Faq { .. } => Intent::Faq,
            IntentDetectionResult::Summary { .. } => Intent::Summary,
            IntentDetectionResult::Unclear { .. } => Intent::Unclear,
        }
    }

    pub fn query(&self) -> Option<&str> {
        match self {
            IntentDetectionResult::Search { query, .. } => Some(query),
            IntentDetectionResult::Faq { query, .. } => Some(query),
            _ => None,
        }
    }

    pub fn document_url(&self) -> Option<&str> {
        match self {
            IntentDetectionResult::Summary { document_url, .. } => Some(document_url),
            _ => None,
        }
    }

    pub fn reasoning(&self) -> Option<&str> {
        match self {
            IntentDetectionResult::Search { reasoning, .. }
            | IntentDetectionResult::Faq { reasoning, .. }
            | IntentDetectionResult::Summary { reasoning, .. }
            | IntentDetectionResult::Unclear { reasoning } => reasoning.as_deref(),
        }
    }

    /// The fallback used when classification fails to parse: treat the
    /// original message as a search query rather than blocking the turn.
    /// Downstream relevance evaluation filters out anything irrelevant.
    pub fn search_fallback(user_message: impl Into<String>, parse_error: impl Into<String>) -> Self {
        IntentDetectionResult::Search { query: user_message.into(), reasoning: Some(parse_error.into()) }
    }
}

/// The outcome of `evaluateResults`.
///
/// Invariant enforced at construction: if `has_relevant_results` is false,
/// both lists are empty; `relevant_indexes` is deduplicated, ordered, and
/// capped at the configured maximum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceEvaluationResult {
    pub has_relevant_results: bool,
    pub relevant_indexes: Vec<usize>,
    pub relevant_doc_ids: Vec<String>,
}

impl RelevanceEvaluationResult {
    /// Builds a result from a classifier's raw 1-based indexes, silently
    /// dropping any index outside `[1 ..= doc_ids.len()]` and any duplicate,
    /// then capping at `max_relevant_docs`.
    pub fn from_indexes(raw_indexes: &[usize], doc_ids: &[String], max_relevant_docs: usize) -> Self {
        let mut seen = HashSet::new();
        let mut indexes = Vec::new();
        for &idx in raw_indexes {
            if indexes.len() >= max_relevant_docs {
                break;
            }
            if idx >= 1 && idx <= doc_ids.len() && seen.insert(idx) {
                indexes.push(idx);
            }
        }
        if indexes.is_empty() {
            return Self { has_relevant_results: false, relevant_indexes: Vec::new(), relevant_doc_ids: Vec::new() };
        }
        let relevant_doc_ids = indexes.iter().map(|&i| doc_ids[i - 1].clone()).collect();
        Self { has_relevant_results: true, relevant_indexes: indexes, relevant_doc_ids }
    }

    pub fn none() -> Self {
        Self { has_relevant_results: false, relevant_indexes: Vec::new(), relevant_doc_ids: Vec::new() }
    }

    /// The fallback used when relevance classification fails to parse:
    /// treat every hit as relevant rather than discarding the search.
    pub fn all_relevant(doc_ids: &[String], max_relevant_docs: usize) -> Self {
        let capped: Vec<usize> = (1..=doc_ids.len()).take(max_relevant_docs).collect();
        let relevant_doc_ids = capped.iter().map(|&i| doc_ids[i - 1].clone()).collect();
        Self { has_relevant_results: !capped.is_empty(), relevant_indexes: capped, relevant_doc_ids }
    }
}

/// Last-known availability of a backend, refreshed by a periodic probe.
#[derive(Debug, Clone, Copy)]
pub struct BackendAvailability {
    state: Option<bool>,
}

impl BackendAvailability {
    pub fn unknown() -> Self {
        Self { state: None }
    }

    pub fn set(&mut self, available: bool) {
        self.state = Some(available);
    }

    /// `None` means no probe has completed yet; callers that need a
    /// decision before the first scheduled probe should run one
    /// synchronously rather than treat unknown as unavailable.
    pub fn get(&self) -> Option<bool> {
        self.state
    }
}

impl Default for BackendAvailability {
    fn default() -> Self {
        Self::unknown()
    }
}

/// A caller-supplied locale used to steer the language of generated
/// answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locale {
    pub tag: String,
    pub display_name: String,
}

impl Locale {
    pub fn new(tag: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self { tag: tag.into(), display_name: display_name.into() }
    }

    pub fn english() -> Self {
        Self::new("en", "English")
    }

    pub fn is_english(&self) -> bool {
        self.tag.eq_ignore_ascii_case("en")
    }

    /// The `{{languageInstruction}}` placeholder value: empty for English,
    /// otherwise an explicit instruction naming the display language.
    pub fn language_instruction(&self) -> String {
        if self.is_english() {
            String::new()
        } else {
            format!("IMPORTANT: You MUST respond in {}.", self.display_name)
        }
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self::english()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relevance_filters_out_of_range_indexes() {
        let doc_ids = vec!["a".to_string(), "b".to_string()];
        let result = RelevanceEvaluationResult::from_indexes(&[1, 5, 2, 0], &doc_ids, 10);
        assert!(result.has_relevant_results);
        assert_eq!(result.relevant_indexes, vec![1, 2]);
        assert_eq!(result.relevant_doc_ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn relevance_caps_at_max() {
        let doc_ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let result = RelevanceEvaluationResult::from_indexes(&[1, 2, 3], &doc_ids, 2);
        assert_eq!(result.relevant_indexes, vec![1, 2]);
    }

    #[test]
    fn relevance_empty_when_no_valid_indexes() {
        let doc_ids = vec!["a".to_string()];
        let result = RelevanceEvaluationResult::from_indexes(&[9], &doc_ids, 5);
        assert!(!result.has_relevant_results);
        assert!(result.relevant_indexes.is_empty());
        assert!(result.relevant_doc_ids.is_empty());
    }

    #[test]
    fn english_locale_has_no_language_instruction() {
        assert_eq!(Locale::english().language_instruction(), "");
        assert_eq!(Locale::new("EN", "English").language_instruction(), "");
    }

    #[test]
    fn non_english_locale_emits_instruction() {
        let locale = Locale::new("ja", "Japanese");
        assert_eq!(locale.language_instruction(), "IMPORTANT: You MUST respond in Japanese.");
    }
}
