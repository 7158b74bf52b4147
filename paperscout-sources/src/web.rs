//! General web search through a SERP-style JSON endpoint.
//!
//! Single-shot. Response shapes vary between providers, so records are read
//! leniently from whichever list the body carries.

use crate::http::{build_client, read_json, send_with_retry};
use async_trait::async_trait;
use paperscout_core::{CandidatePaper, SourceAdapter, SourceCursor, SourceError, SourceKind, SourcePage};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;
use url::Url;

const LIST_KEYS: [&str; 4] = ["result", "items", "data", "organic"];
const MIN_URL_LEN: usize = 10;
const TITLE_FROM_URL_CHARS: usize = 80;
const RETRY_BACKOFF: [Duration; 1] = [Duration::from_secs(2)];

pub struct WebSearchSource {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl WebSearchSource {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_client(SourceKind::Web)?,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl SourceAdapter for WebSearchSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Web
    }

    async fn fetch(
        &self,
        topic: &str,
        count: usize,
        cursor: &SourceCursor,
    ) -> Result<SourcePage, SourceError> {
        if cursor.exhausted {
            return Ok(SourcePage::exhausted(cursor));
        }
        let query = format!("{} research paper", topic.trim());
        debug!(query = query.as_str(), "Web search");

        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({ "query": query, "num": count }));
        let response = send_with_retry(SourceKind::Web, request, None, &RETRY_BACKOFF).await?;
        let body: Value = read_json(SourceKind::Web, response).await?;
        let records = parse_results(&body, topic, count);
        Ok(SourcePage::new(records, cursor.advanced_by(count).finished()))
    }
}

/// The result list: a bare array, or the first list under a known key
/// (looking one object level down as well).
fn result_list(body: &Value) -> &[Value] {
    if let Some(items) = body.as_array() {
        return items;
    }
    for key in LIST_KEYS {
        match body.get(key) {
            Some(Value::Array(items)) => return items,
            Some(nested @ Value::Object(_)) => {
                for inner in LIST_KEYS {
                    if let Some(Value::Array(items)) = nested.get(inner) {
                        return items;
                    }
                }
            }
            _ => {}
        }
    }
    &[]
}

fn first_str<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| item.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Unwrap redirect links, add a missing scheme and reject fragments.
pub fn normalize_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let unwrapped = if raw.contains("/url?") {
        let absolute = if raw.starts_with('/') {
            format!("https://www.google.com{raw}")
        } else {
            raw.to_string()
        };
        Url::parse(&absolute)
            .ok()
            .and_then(|u| {
                u.query_pairs()
                    .find(|(k, _)| k == "q" || k == "url")
                    .map(|(_, v)| v.into_owned())
            })
            .unwrap_or_else(|| raw.to_string())
    } else {
        raw.to_string()
    };

    if unwrapped.len() < MIN_URL_LEN {
        return None;
    }
    let with_scheme = if unwrapped.starts_with("http://") || unwrapped.starts_with("https://") {
        unwrapped
    } else {
        format!("https://{}", unwrapped.trim_start_matches('/'))
    };
    Url::parse(&with_scheme).ok().map(|_| with_scheme)
}

fn authors_of(item: &Value) -> Vec<String> {
    match item.get("authors").or_else(|| item.get("author")) {
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(|a| a.as_str().or_else(|| a.get("name").and_then(Value::as_str)))
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Turn a search response into at most `count` unique records.
pub fn parse_results(body: &Value, topic: &str, count: usize) -> Vec<CandidatePaper> {
    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for item in result_list(body) {
        if records.len() >= count {
            break;
        }
        let Some(url) = first_str(item, &["url", "link", "href"]).and_then(normalize_url) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }
        let title = first_str(item, &["title", "name"])
            .map(str::to_string)
            .unwrap_or_else(|| url.chars().take(TITLE_FROM_URL_CHARS).collect());
        let summary = first_str(item, &["snippet", "description", "summary"]).map(str::to_string);

        records.push(
            CandidatePaper::new(topic, title, url, SourceKind::Web)
                .with_authors(authors_of(item))
                .with_abstract(summary),
        );
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_organic_results() {
        let body = json!({
            "organic": [
                {"title": "Reef Survey 2024", "link": "https://reefs.org/survey", "snippet": "Coral cover.", "authors": "A. Diaz, B. Kim"},
                {"title": "Dup", "link": "https://reefs.org/survey"},
                {"title": "", "url": "www.example.org/paper/7"},
                {"title": "Too short", "url": "a.b"},
                {"title": "Redirected", "link": "/url?q=https://journals.org/x/1&sa=U"}
            ]
        });
        let records = parse_results(&body, "reefs", 10);
        let urls: Vec<&str> = records.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://reefs.org/survey",
                "https://www.example.org/paper/7",
                "https://journals.org/x/1"
            ]
        );
        assert_eq!(records[0].authors, vec!["A. Diaz", "B. Kim"]);
        assert_eq!(records[0].abstract_text.as_deref(), Some("Coral cover."));
        assert_eq!(records[1].title, "https://www.example.org/paper/7");
        assert!(records.iter().all(|r| r.venue.is_empty() && r.published.is_none()));
    }

    #[test]
    fn test_parse_bare_and_nested_lists() {
        let bare = json!([{"title": "One", "url": "https://one.org/p"}]);
        assert_eq!(parse_results(&bare, "t", 5).len(), 1);

        let nested = json!({"result": {"items": [{"name": "Two", "href": "https://two.org/p"}]}});
        let records = parse_results(&nested, "t", 5);
        assert_eq!(records[0].title, "Two");
    }

    #[test]
    fn test_results_capped_at_count() {
        let items: Vec<Value> = (0..8)
            .map(|i| json!({"title": format!("P{i}"), "url": format!("https://p.org/{i}")}))
            .collect();
        let body = json!({ "data": items });
        assert_eq!(parse_results(&body, "t", 3).len(), 3);
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://www.google.com/url?q=https://x.org/a%3Fb&sa=U").as_deref(),
            Some("https://x.org/a?b")
        );
        assert_eq!(normalize_url("x.org").as_deref(), None);
        assert_eq!(normalize_url("  arxiv.org/abs/1 ").as_deref(), Some("https://arxiv.org/abs/1"));
    }
}
