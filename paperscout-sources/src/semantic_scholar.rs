//! Semantic Scholar Graph API adapter (`/paper/search`, offset paging).

use crate::http::{RateLimiter, build_client, read_json, send_with_retry};
use async_trait::async_trait;
use paperscout_core::config::SemanticScholarConfig;
use paperscout_core::paper::parse_published;
use paperscout_core::{CandidatePaper, SourceAdapter, SourceCursor, SourceError, SourceKind, SourcePage};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const SEARCH_FIELDS: &str = "title,authors,year,publicationDate,venue,abstract,url,externalIds";
/// Largest page the search endpoint serves.
const MAX_LIMIT: usize = 100;
const RETRY_BACKOFF: [Duration; 2] = [Duration::from_secs(2), Duration::from_secs(5)];

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub total: Option<usize>,
    #[serde(default)]
    pub next: Option<usize>,
    #[serde(default)]
    pub data: Vec<S2Paper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S2Paper {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<S2Author>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub publication_date: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub external_ids: Option<ExternalIds>,
}

#[derive(Debug, Deserialize)]
pub struct S2Author {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExternalIds {
    #[serde(default, rename = "ArXiv")]
    pub arxiv: Option<String>,
    #[serde(default, rename = "DOI")]
    pub doi: Option<String>,
}

pub struct SemanticScholarSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    limiter: RateLimiter,
}

impl SemanticScholarSource {
    /// The API key is read from `config.api_key_env` if set; unauthenticated
    /// access works at a lower rate.
    pub fn new(config: &SemanticScholarConfig) -> Result<Self, SourceError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::with_key(config, api_key)
    }

    pub fn with_key(
        config: &SemanticScholarConfig,
        api_key: Option<String>,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_client(SourceKind::SemanticScholar)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            limiter: RateLimiter::from_millis(config.min_interval_ms),
        })
    }
}

#[async_trait]
impl SourceAdapter for SemanticScholarSource {
    fn kind(&self) -> SourceKind {
        SourceKind::SemanticScholar
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
        let limit = count.clamp(1, MAX_LIMIT);
        let url = format!(
            "{}/paper/search?query={}&offset={}&limit={}&fields={}",
            self.base_url,
            urlencoding::encode(topic.trim()),
            cursor.offset,
            limit,
            SEARCH_FIELDS
        );
        debug!(url = url.as_str(), "Semantic Scholar search");

        let mut request = self.client.get(&url);
        if let Some(ref key) = self.api_key {
            request = request.header("x-api-key", key);
        }
        let response = send_with_retry(
            SourceKind::SemanticScholar,
            request,
            Some(&self.limiter),
            &RETRY_BACKOFF,
        )
        .await?;
        let body: SearchResponse = read_json(SourceKind::SemanticScholar, response).await?;
        Ok(into_page(topic, body, cursor))
    }
}

pub fn into_page(topic: &str, body: SearchResponse, cursor: &SourceCursor) -> SourcePage {
    let returned = body.data.len();
    let records = body
        .data
        .into_iter()
        .filter_map(|p| p.into_candidate(topic))
        .collect();
    // A missing `next` means the result set ends with this page.
    let next = match body.next {
        Some(next_offset) if returned > 0 => SourceCursor {
            offset: next_offset,
            ..cursor.clone()
        },
        _ => cursor.advanced_by(returned).finished(),
    };
    debug!(total = ?body.total, returned, exhausted = next.exhausted, "Semantic Scholar page");
    SourcePage::new(records, next)
}

impl S2Paper {
    /// The paper's canonical link: its S2 page, else arXiv, else DOI.
    fn link(&self) -> Option<String> {
        if let Some(url) = self.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            return Some(url.to_string());
        }
        let ids = self.external_ids.as_ref()?;
        if let Some(arxiv) = ids.arxiv.as_deref().filter(|a| !a.is_empty()) {
            return Some(format!("https://arxiv.org/abs/{arxiv}"));
        }
        ids.doi
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(|doi| format!("https://doi.org/{doi}"))
    }

    fn into_candidate(self, topic: &str) -> Option<CandidatePaper> {
        let url = self.link()?;
        let title = self.title.as_deref().map(str::trim).filter(|t| !t.is_empty())?.to_string();
        let published = self
            .publication_date
            .as_deref()
            .and_then(parse_published)
            .or_else(|| self.year.and_then(|y| parse_published(&y.to_string())));
        let authors = self.authors.into_iter().filter_map(|a| a.name).collect();
        Some(
            CandidatePaper::new(topic, title, url, SourceKind::SemanticScholar)
                .with_authors(authors)
                .with_published(published)
                .with_venue(self.venue.unwrap_or_default())
                .with_abstract(self.abstract_text),
        )
    }
}
