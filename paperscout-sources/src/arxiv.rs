//! arXiv Atom API adapter: newest-first keyword search with offset paging.

use crate::http::{RateLimiter, build_client, read_text, send_with_retry};
use async_trait::async_trait;
use paperscout_core::config::ArxivConfig;
use paperscout_core::paper::parse_published;
use paperscout_core::{CandidatePaper, SourceAdapter, SourceCursor, SourceError, SourceKind, SourcePage};
use std::time::Duration;
use tracing::debug;

/// Abstracts longer than this are cut.
const MAX_ABSTRACT_CHARS: usize = 8000;

/// One parsed `<entry>`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArxivEntry {
    pub title: String,
    pub authors: Vec<String>,
    pub summary: String,
    pub published: Option<String>,
    pub url: String,
    pub journal_ref: Option<String>,
}

/// A parsed feed page.
#[derive(Debug, Clone)]
pub struct ArxivFeed {
    pub entries: Vec<ArxivEntry>,
    pub total_results: Option<usize>,
}

pub struct ArxivSource {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
    backoff: Vec<Duration>,
}

impl ArxivSource {
    pub fn new(config: &ArxivConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_client(SourceKind::Arxiv)?,
            base_url: config.base_url.clone(),
            limiter: RateLimiter::from_millis(config.min_interval_ms),
            backoff: config
                .retry_backoff_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        })
    }
}

#[async_trait]
impl SourceAdapter for ArxivSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Arxiv
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
        let url = build_search_url(&self.base_url, topic, cursor.offset, count);
        debug!(url = url.as_str(), "arXiv search");

        let response = send_with_retry(
            SourceKind::Arxiv,
            self.client.get(&url),
            Some(&self.limiter),
            &self.backoff,
        )
        .await?;
        let body = read_text(SourceKind::Arxiv, response).await?;
        let feed = parse_atom_response(&body);

        let returned = feed.entries.len();
        let reached_total = feed
            .total_results
            .is_some_and(|total| cursor.offset + returned >= total);
        let next = if returned < count || reached_total {
            cursor.advanced_by(returned).finished()
        } else {
            cursor.advanced_by(returned)
        };

        let records = feed
            .entries
            .into_iter()
            .map(|entry| entry.into_candidate(topic))
            .collect();
        Ok(SourcePage::new(records, next))
    }
}

impl ArxivEntry {
    fn into_candidate(self, topic: &str) -> CandidatePaper {
        let venue = self
            .journal_ref
            .filter(|j| !j.is_empty())
            .unwrap_or_else(|| "arXiv".to_string());
        let summary: String = self.summary.chars().take(MAX_ABSTRACT_CHARS).collect();
        CandidatePaper::new(topic, self.title, self.url, SourceKind::Arxiv)
            .with_authors(self.authors)
            .with_published(self.published.as_deref().and_then(parse_published))
            .with_venue(venue)
            .with_abstract(Some(summary))
    }
}

// ── URL Building ──────────────────────────────────────────────

/// Build the search URL: keyword match over all fields, newest submissions first.
pub fn build_search_url(base_url: &str, topic: &str, start: usize, max_results: usize) -> String {
    let search_query = format!("all:{}", topic.trim());
    format!(
        "{}?search_query={}&start={}&max_results={}&sortBy=submittedDate&sortOrder=descending",
        base_url,
        urlencoding::encode(&search_query),
        start,
        max_results,
    )
}

// ── XML Parsing ───────────────────────────────────────────────

/// Parse an Atom feed. Entries without a title or url are skipped.
pub fn parse_atom_response(xml: &str) -> ArxivFeed {
    let entries = extract_entries(xml)
        .into_iter()
        .filter_map(parse_entry)
        .collect();
    ArxivFeed {
        entries,
        total_results: extract_opensearch_value(xml, "totalResults"),
    }
}

/// Extract all <entry>...</entry> blocks from the XML.
fn extract_entries(xml: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut search_from = 0;
    let end_tag = "</entry>";

    while let Some(pos) = xml[search_from..].find("<entry>") {
        let start = search_from + pos;
        let Some(end_pos) = xml[start..].find(end_tag) else {
            break;
        };
        let end = start + end_pos + end_tag.len();
        entries.push(&xml[start..end]);
        search_from = end;
    }
    entries
}

fn parse_entry(entry: &str) -> Option<ArxivEntry> {
    let title = normalize_whitespace(&decode_entities(&extract_tag_text(entry, "title")?));
    if title.is_empty() {
        return None;
    }

    let mut authors = Vec::new();
    let mut author_search = 0;
    while let Some(pos) = entry[author_search..].find("<author>") {
        let author_start = author_search + pos;
        let Some(end_pos) = entry[author_start..].find("</author>") else {
            break;
        };
        let author_end = author_start + end_pos + "</author>".len();
        if let Some(name) = extract_tag_text(&entry[author_start..author_end], "name") {
            authors.push(decode_entities(&name));
        }
        author_search = author_end;
    }

    // The alternate (abstract page) link, falling back to <id>.
    let mut url = None;
    let mut link_search = 0;
    while let Some(pos) = entry[link_search..].find("<link") {
        let link_start = link_search + pos;
        let Some(end_pos) = entry[link_start..].find('>') else {
            break;
        };
        let link_end = link_start + end_pos + 1;
        let link_tag = &entry[link_start..link_end];
        if url.is_none()
            && extract_attribute(link_tag, "rel").as_deref() == Some("alternate")
            && let Some(href) = extract_attribute(link_tag, "href").filter(|h| !h.is_empty())
        {
            url = Some(href);
        }
        link_search = link_end;
    }
    let url = url.or_else(|| extract_tag_text(entry, "id"))?;
    if url.is_empty() {
        return None;
    }

    let published = extract_tag_text(entry, "published")
        .filter(|p| !p.is_empty())
        .or_else(|| extract_tag_text(entry, "updated"))
        .filter(|p| !p.is_empty());

    Some(ArxivEntry {
        title,
        authors,
        summary: normalize_whitespace(&decode_entities(
            &extract_tag_text(entry, "summary").unwrap_or_default(),
        )),
        published,
        url,
        journal_ref: extract_tag_text(entry, "arxiv:journal_ref")
            .map(|j| normalize_whitespace(&decode_entities(&j))),
    })
}

/// Extract the text content of the first occurrence of <tag>text</tag>.
fn extract_tag_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");

    // Skip longer tag names sharing the prefix (<id> vs <idx>).
    let mut from = 0;
    let start_pos = loop {
        let pos = from + xml[from..].find(&open)?;
        match xml[pos + open.len()..].chars().next() {
            Some('>') | Some(' ') | Some('\n') | Some('\t') | Some('/') => break pos,
            _ => from = pos + open.len(),
        }
    };
    let content_start = xml[start_pos..].find('>')? + start_pos + 1;
    let content_end = xml[content_start..].find(&close)? + content_start;

    Some(xml[content_start..content_end].trim().to_string())
}

/// Extract an attribute value from a tag string.
fn extract_attribute(tag: &str, attr: &str) -> Option<String> {
    let search = format!(" {attr}=\"");
    let start = tag.find(&search)? + search.len();
    let end = tag[start..].find('"')? + start;
    Some(tag[start..end].to_string())
}

/// Collapse runs of whitespace into single spaces.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Extract an OpenSearch value like <opensearch:totalResults>100</opensearch:totalResults>.
fn extract_opensearch_value(xml: &str, field: &str) -> Option<usize> {
    let tag = format!("opensearch:{field}");
    extract_tag_text(xml, &tag).and_then(|s| s.trim().parse().ok())
}
