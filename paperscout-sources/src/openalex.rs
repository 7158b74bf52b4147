//! OpenAlex works search adapter (page-numbered paging).

use crate::http::{RateLimiter, build_client, read_json, send_with_retry};
use async_trait::async_trait;
use paperscout_core::config::OpenAlexConfig;
use paperscout_core::paper::parse_published;
use paperscout_core::{CandidatePaper, SourceAdapter, SourceCursor, SourceError, SourceKind, SourcePage};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const MAX_PER_PAGE: usize = 200;
const RETRY_BACKOFF: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(3)];

#[derive(Debug, Deserialize)]
pub struct WorksResponse {
    #[serde(default)]
    pub meta: Option<Meta>,
    #[serde(default)]
    pub results: Vec<Work>,
}

#[derive(Debug, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub count: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct Work {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub publication_date: Option<String>,
    #[serde(default)]
    pub publication_year: Option<i32>,
    #[serde(default)]
    pub authorships: Vec<Authorship>,
    #[serde(default)]
    pub primary_location: Option<Location>,
    #[serde(default)]
    pub abstract_inverted_index: Option<HashMap<String, Vec<usize>>>,
}

#[derive(Debug, Deserialize)]
pub struct Authorship {
    #[serde(default)]
    pub author: Option<NamedEntity>,
}

#[derive(Debug, Deserialize)]
pub struct NamedEntity {
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub landing_page_url: Option<String>,
    #[serde(default)]
    pub source: Option<NamedEntity>,
}

pub struct OpenAlexSource {
    client: reqwest::Client,
    base_url: String,
    email: Option<String>,
    limiter: RateLimiter,
}

impl OpenAlexSource {
    pub fn new(config: &OpenAlexConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_client(SourceKind::Openalex)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.email.clone().filter(|e| !e.trim().is_empty()),
            limiter: RateLimiter::from_millis(config.min_interval_ms),
        })
    }
}

#[async_trait]
impl SourceAdapter for OpenAlexSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Openalex
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
        let per_page = count.clamp(1, MAX_PER_PAGE);
        let page = cursor.offset / per_page + 1;
        let mut url = format!(
            "{}/works?search={}&per_page={}&page={}",
            self.base_url,
            urlencoding::encode(topic.trim()),
            per_page,
            page
        );
        if let Some(ref email) = self.email {
            url.push_str(&format!("&mailto={}", urlencoding::encode(email)));
        }
        debug!(url = url.as_str(), "OpenAlex search");

        let response = send_with_retry(
            SourceKind::Openalex,
            self.client.get(&url),
            Some(&self.limiter),
            &RETRY_BACKOFF,
        )
        .await?;
        let body: WorksResponse = read_json(SourceKind::Openalex, response).await?;
        Ok(into_page(topic, body, cursor, per_page))
    }
}

pub fn into_page(
    topic: &str,
    body: WorksResponse,
    cursor: &SourceCursor,
    per_page: usize,
) -> SourcePage {
    let returned = body.results.len();
    let total = body.meta.and_then(|m| m.count);
    let next = cursor.advanced_by(returned);
    let exhausted =
        returned < per_page || total.is_some_and(|total| next.offset >= total);
    let records = body
        .results
        .into_iter()
        .filter_map(|w| w.into_candidate(topic))
        .collect();
    SourcePage::new(records, if exhausted { next.finished() } else { next })
}

/// Rebuild plain text from OpenAlex's `{word: [positions]}` abstract index.
pub fn rebuild_abstract(index: &HashMap<String, Vec<usize>>) -> Option<String> {
    let mut positioned: Vec<(usize, &str)> = index
        .iter()
        .flat_map(|(word, positions)| positions.iter().map(move |p| (*p, word.as_str())))
        .collect();
    if positioned.is_empty() {
        return None;
    }
    positioned.sort_by_key(|(p, _)| *p);
    Some(
        positioned
            .into_iter()
            .map(|(_, w)| w)
            .collect::<Vec<_>>()
            .join(" "),
    )
}

impl Work {
    fn into_candidate(self, topic: &str) -> Option<CandidatePaper> {
        let title = self
            .title
            .or(self.display_name)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())?;
        let landing = self
            .primary_location
            .as_ref()
            .and_then(|l| l.landing_page_url.clone());
        let url = self
            .doi
            .filter(|d| !d.is_empty())
            .or(landing)
            .or(self.id)
            .filter(|u| !u.is_empty())?;
        let venue = self
            .primary_location
            .and_then(|l| l.source)
            .and_then(|s| s.display_name)
            .unwrap_or_default();
        let published = self
            .publication_date
            .as_deref()
            .and_then(parse_published)
            .or_else(|| self.publication_year.and_then(|y| parse_published(&y.to_string())));
        let authors = self
            .authorships
            .into_iter()
            .filter_map(|a| a.author.and_then(|au| au.display_name))
            .collect();
        let abstract_text = self.abstract_inverted_index.as_ref().and_then(rebuild_abstract);

        Some(
            CandidatePaper::new(topic, title, url, SourceKind::Openalex)
                .with_authors(authors)
                .with_published(published)
                .with_venue(venue)
                .with_abstract(abstract_text),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SAMPLE: &str = r#"{
        "meta": {"count": 3, "page": 1, "per_page": 2},
        "results": [
            {
                "id": "https://openalex.org/W1",
                "doi": "https://doi.org/10.1/abc",
                "title": "Soil Carbon Under Warming",
                "publication_date": "2022-03-01",
                "publication_year": 2022,
                "authorships": [{"author": {"display_name": "Ola Norman"}}],
                "primary_location": {"landing_page_url": "https://j.org/1", "source": {"display_name": "Global Change Biology"}},
                "abstract_inverted_index": {"Warming": [0], "soils": [2], "dries": [1]}
            },
            {
                "id": "https://openalex.org/W2",
                "doi": null,
                "display_name": "Microbial Respiration",
                "publication_year": 2019,
                "authorships": [],
                "primary_location": null,
                "abstract_inverted_index": null
            }
        ]
    }"#;

    #[test]
    fn test_parse_works_page() {
        let body: WorksResponse = serde_json::from_str(SAMPLE).unwrap();
        let page = into_page("soil", body, &SourceCursor::default(), 2);
        assert_eq!(page.records.len(), 2);
        assert!(!page.is_exhausted());
        assert_eq!(page.next.offset, 2);

        let first = &page.records[0];
        assert_eq!(first.url, "https://doi.org/10.1/abc");
        assert_eq!(first.venue, "Global Change Biology");
        assert_eq!(first.abstract_text.as_deref(), Some("Warming dries soils"));
        assert_eq!(first.published, NaiveDate::from_ymd_opt(2022, 3, 1));

        let second = &page.records[1];
        assert_eq!(second.title, "Microbial Respiration");
        assert_eq!(second.url, "https://openalex.org/W2");
        assert_eq!(second.published, NaiveDate::from_ymd_opt(2019, 1, 1));
    }

    #[test]
    fn test_count_bounds_exhaustion() {
        let body: WorksResponse = serde_json::from_str(SAMPLE).unwrap();
        let cursor = SourceCursor {
            offset: 2,
            ..SourceCursor::default()
        };
        let page = into_page("soil", body, &cursor, 2);
        assert!(page.is_exhausted());
    }

    #[test]
    fn test_short_page_exhausts() {
        let body: WorksResponse = serde_json::from_str(r#"{"results": []}"#).unwrap();
        let page = into_page("soil", body, &SourceCursor::default(), 25);
        assert!(page.is_exhausted());
        assert!(page.records.is_empty());
    }

    #[test]
    fn test_rebuild_abstract_empty_index() {
        assert_eq!(rebuild_abstract(&HashMap::new()), None);
    }
}
