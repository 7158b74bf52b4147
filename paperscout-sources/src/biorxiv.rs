//! bioRxiv adapter, scraped from the site's search results page.
//!
//! Single-shot: the first call returns what the page lists and reports
//! the source exhausted.

use crate::http::{build_client, read_text, send_with_retry};
use async_trait::async_trait;
use chrono::NaiveDate;
use paperscout_core::config::BiorxivConfig;
use paperscout_core::{CandidatePaper, SourceAdapter, SourceCursor, SourceError, SourceKind, SourcePage};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::debug;
use url::Url;

const MAX_RESULTS: usize = 75;
const RETRY_BACKOFF: [Duration; 1] = [Duration::from_secs(5)];

pub struct BiorxivSource {
    client: reqwest::Client,
    base_url: String,
}

impl BiorxivSource {
    pub fn new(config: &BiorxivConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_client(SourceKind::Biorxiv)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SourceAdapter for BiorxivSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Biorxiv
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
        let url = build_search_url(&self.base_url, topic, count.clamp(1, MAX_RESULTS));
        debug!(url = url.as_str(), "bioRxiv search");

        let response = send_with_retry(
            SourceKind::Biorxiv,
            self.client.get(&url),
            None,
            &RETRY_BACKOFF,
        )
        .await?;
        let html = read_text(SourceKind::Biorxiv, response).await?;
        let mut records = parse_search_results(&html, &self.base_url, topic)?;
        records.truncate(count);
        Ok(SourcePage::new(records, cursor.advanced_by(count).finished()))
    }
}

/// The search page URL, newest publications first.
pub fn build_search_url(base_url: &str, topic: &str, num_results: usize) -> String {
    let terms = format!(
        "{} numresults:{} sort:publication-date direction:descending",
        topic.trim(),
        num_results
    );
    format!("{}/search/{}", base_url, urlencoding::encode(&terms))
}

fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::Parse {
        source_name: SourceKind::Biorxiv.to_string(),
        message: format!("invalid selector {css}: {e:?}"),
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

/// Parse result entries. Links that do not point at bioRxiv are dropped.
pub fn parse_search_results(
    html: &str,
    base_url: &str,
    topic: &str,
) -> Result<Vec<CandidatePaper>, SourceError> {
    let document = Html::parse_document(html);
    let item_sel = selector(".highwire-article-citation")?;
    let title_sel = selector("a.highwire-cite-linked-title")?;
    let author_sel = selector(".highwire-citation-author")?;
    let doi_sel = selector(".highwire-cite-metadata-doi")?;
    let base = Url::parse(base_url).ok();

    let mut records = Vec::new();
    for item in document.select(&item_sel) {
        let Some(anchor) = item.select(&title_sel).next() else {
            continue;
        };
        let title = normalize(&element_text(anchor));
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let url = match (&base, Url::parse(href)) {
            (_, Ok(absolute)) => absolute.to_string(),
            (Some(base), Err(_)) => match base.join(href) {
                Ok(joined) => joined.to_string(),
                Err(_) => continue,
            },
            (None, Err(_)) => continue,
        };
        if title.is_empty() || !url.contains("biorxiv") {
            continue;
        }

        let authors: Vec<String> = item
            .select(&author_sel)
            .map(|a| normalize(&element_text(a)))
            .filter(|a| !a.is_empty())
            .collect();
        let doi_text = item.select(&doi_sel).next().map(element_text);
        let published = doi_text
            .as_deref()
            .and_then(date_from_doi)
            .or_else(|| date_from_doi(&url));

        records.push(
            CandidatePaper::new(topic, title, url, SourceKind::Biorxiv)
                .with_authors(authors)
                .with_published(published)
                .with_venue("bioRxiv"),
        );
    }
    Ok(records)
}

/// `10.1101/2024.05.01.592000` carries its posting date.
pub fn date_from_doi(text: &str) -> Option<NaiveDate> {
    let rest = &text[text.find("10.1101/")? + "10.1101/".len()..];
    let date = rest.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y.%m.%d").ok()
}

fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
