//! Resilient extraction of structured classification output from LLM text.
//!
//! Models asked to "respond with JSON" routinely wrap it in a code fence,
//! add a sentence before or after it, or occasionally emit near-JSON that a
//! strict parser rejects. Each entry point here tries, in order: strip any
//! code fence and parse the whole trimmed body; extract the first balanced
//! `{...}` object and parse that; fall back to pulling individual fields
//! out with a regex; and finally a documented default that keeps the
//! pipeline moving rather than failing the turn.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use ragchat_core::{IntentDetectionResult, RelevanceEvaluationResult};

/// Strips a leading/trailing ``` or ```json code fence, if present.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else { return trimmed };
    let after_open = after_open.strip_prefix("json").unwrap_or(after_open);
    let after_open = after_open.trim_start_matches(['\n', '\r']);
    after_open.strip_suffix("```").unwrap_or(after_open).trim()
}

/// Finds the first balanced `{...}` object anywhere in `text`.
fn extract_first_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }

    None
}

static INTENT_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r#""intent"\s*:\s*"(\w+)""#).unwrap());
static QUERY_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r#""query"\s*:\s*"([^"]*)""#).unwrap());
static DOCUMENT_URL_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""documentUrl"\s*:\s*"([^"]*)""#).unwrap());
static REASONING_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r#""reasoning"\s*:\s*"([^"]*)""#).unwrap());
static HAS_RELEVANT_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""hasRelevantResults"\s*:\s*(true|false)"#).unwrap());
static RELEVANT_INDEXES_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""relevantIndexes"\s*:\s*\[([^\]]*)\]"#).unwrap());
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

#[derive(Debug, Deserialize)]
struct RawIntent {
    intent: String,
    #[serde(default)]
    query: Option<String>,
    #[serde(rename = "documentUrl", default)]
    document_url: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Parses a `detectIntent` response, falling back to a search query built
/// from the original user message if nothing in `text` parses.
pub fn parse_intent(text: &str, user_message: &str) -> IntentDetectionResult {
    if let Some(result) = parse_intent_structured(text) {
        return result;
    }
    if let Some(result) = parse_intent_regex(text) {
        return result;
    }
    IntentDetectionResult::search_fallback(user_message, format!("unparseable intent response: {}", truncate(text)))
}

fn parse_intent_structured(text: &str) -> Option<IntentDetectionResult> {
    let body = strip_code_fence(text);
    let raw: RawIntent = serde_json::from_str(body)
        .ok()
        .or_else(|| extract_first_object(body).and_then(|obj| serde_json::from_str(obj).ok()))?;

    to_intent_result(&raw.intent, raw.query, raw.document_url, raw.reasoning)
}

fn parse_intent_regex(text: &str) -> Option<IntentDetectionResult> {
    let intent = INTENT_FIELD.captures(text)?.get(1)?.as_str().to_string();
    let query = QUERY_FIELD.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string());
    let document_url =
        DOCUMENT_URL_FIELD.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string());
    let reasoning = REASONING_FIELD.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string());

    to_intent_result(&intent, query, document_url, reasoning)
}

fn to_intent_result(
    intent: &str,
    query: Option<String>,
    document_url: Option<String>,
    reasoning: Option<String>,
) -> Option<IntentDetectionResult> {
    match intent.to_ascii_lowercase().as_str() {
        "search" => Some(IntentDetectionResult::Search { query: query?, reasoning }),
        "faq" => Some(IntentDetectionResult::Faq { query: query?, reasoning }),
        "summary" => Some(IntentDetectionResult::Summary { document_url: document_url?, reasoning }),
        "unclear" => Some(IntentDetectionResult::Unclear { reasoning }),
        _ => None,
    }
}

/// Parses an `evaluateResults` response, falling back to treating every
/// candidate as relevant (capped) if nothing in `text` parses.
pub fn parse_relevance(text: &str, doc_ids: &[String], max_relevant_docs: usize) -> RelevanceEvaluationResult {
    if let Some(indexes) = parse_relevance_structured(text) {
        return RelevanceEvaluationResult::from_indexes(&indexes, doc_ids, max_relevant_docs);
    }
    if let Some(indexes) = parse_relevance_regex(text) {
        return RelevanceEvaluationResult::from_indexes(&indexes, doc_ids, max_relevant_docs);
    }
    tracing::warn!(response = %truncate(text), "unparseable relevance response, treating all results as relevant");
    RelevanceEvaluationResult::all_relevant(doc_ids, max_relevant_docs)
}

#[derive(Debug, Deserialize)]
struct RawRelevance {
    #[serde(rename = "hasRelevantResults", default)]
    has_relevant_results: bool,
    #[serde(rename = "relevantIndexes", default)]
    relevant_indexes: Vec<usize>,
}

fn parse_relevance_structured(text: &str) -> Option<Vec<usize>> {
    let body = strip_code_fence(text);
    let raw: RawRelevance = serde_json::from_str(body)
        .ok()
        .or_else(|| extract_first_object(body).and_then(|obj| serde_json::from_str(obj).ok()))?;

    Some(if raw.has_relevant_results { raw.relevant_indexes } else { Vec::new() })
}

fn parse_relevance_regex(text: &str) -> Option<Vec<usize>> {
    let has_relevant = HAS_RELEVANT_FIELD.captures(text)?.get(1)?.as_str() == "true";
    if !has_relevant {
        return Some(Vec::new());
    }
    let list = RELEVANT_INDEXES_FIELD.captures(text)?.get(1)?.as_str();
    Some(NUMBER.find_iter(list).filter_map(|m| m.as_str().parse().ok()).collect())
}

fn truncate(text: &str) -> String {
    text.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json_intent() {
        let result = parse_intent(r#"{"intent":"search","query":"return policy"}"#, "original");
        assert_eq!(result.intent(), ragchat_core::Intent::Search);
        assert_eq!(result.query(), Some("return policy"));
    }

    #[test]
    fn strips_markdown_code_fence() {
        let text = "```json\n{\"intent\": \"faq\", \"query\": \"hours\"}\n```";
        let result = parse_intent(text, "original");
        assert_eq!(result.intent(), ragchat_core::Intent::Faq);
    }

    #[test]
    fn extracts_object_from_surrounding_prose() {
        let text = "Sure, here's my classification:\n{\"intent\": \"summary\", \"documentUrl\": \"https://x/doc\"} Hope that helps!";
        let result = parse_intent(text, "original");
        assert_eq!(result.intent(), ragchat_core::Intent::Summary);
        assert_eq!(result.document_url(), Some("https://x/doc"));
    }

    #[test]
    fn regex_fallback_handles_broken_json() {
        let text = r#"{"intent": "search", "query": "broken,  <-- trailing comma}"#;
        let result = parse_intent(text, "original");
        assert_eq!(result.intent(), ragchat_core::Intent::Search);
    }

    #[test]
    fn unparseable_intent_falls_back_to_search_of_user_message() {
        let result = parse_intent("not json at all", "what is the refund window");
        assert_eq!(result.intent(), ragchat_core::Intent::Search);
        assert_eq!(result.query(), Some("what is the refund window"));
    }

    #[test]
    fn parses_relevance_with_indexes() {
        let doc_ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let result = parse_relevance(r#"{"hasRelevantResults": true, "relevantIndexes": [1, 3]}"#, &doc_ids, 5);
        assert!(result.has_relevant_results);
        assert_eq!(result.relevant_indexes, vec![1, 3]);
    }

    #[test]
    fn parses_relevance_false_ignores_indexes() {
        let doc_ids = vec!["a".to_string()];
        let result = parse_relevance(r#"{"hasRelevantResults": false, "relevantIndexes": [1]}"#, &doc_ids, 5);
        assert!(!result.has_relevant_results);
    }

    #[test]
    fn unparseable_relevance_falls_back_to_all_relevant() {
        let doc_ids = vec!["a".to_string(), "b".to_string()];
        let result = parse_relevance("garbage", &doc_ids, 5);
        assert!(result.has_relevant_results);
        assert_eq!(result.relevant_indexes, vec![1, 2]);
    }
}
