//! The canonical candidate record flowing through a run.
//!
//! Every adapter normalizes its response into `CandidatePaper`; the
//! controller, filter and selector never see source-specific shapes.
//! Field names on the wire match the storage columns (`paper_name`,
//! `paper_authors`, `journal`, `abstract`).

use crate::source::SourceKind;
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A paper record before (and after) relevance judgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePaper {
    /// The originating search query.
    pub topic: String,
    #[serde(rename = "paper_name")]
    pub title: String,
    #[serde(rename = "paper_authors", default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub published: Option<NaiveDate>,
    /// Journal or source label; empty for undated web results.
    #[serde(rename = "journal", default)]
    pub venue: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub fulltext: Option<String>,
    /// Global identity key for dedup and upsert.
    pub url: String,
    #[serde(rename = "source")]
    pub origin: SourceKind,
}

impl CandidatePaper {
    pub fn new(
        topic: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        origin: SourceKind,
    ) -> Self {
        Self {
            topic: topic.into(),
            title: title.into(),
            authors: Vec::new(),
            published: None,
            venue: String::new(),
            abstract_text: None,
            fulltext: None,
            url: url.into(),
            origin,
        }
    }

    pub fn with_authors(mut self, authors: Vec<String>) -> Self {
        self.authors = authors;
        self
    }

    pub fn with_published(mut self, published: Option<NaiveDate>) -> Self {
        self.published = published;
        self
    }

    pub fn with_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = venue.into();
        self
    }

    pub fn with_abstract(mut self, abstract_text: Option<String>) -> Self {
        self.abstract_text = abstract_text.filter(|a| !a.trim().is_empty());
        self
    }

    /// A record is usable only with both a title and a url.
    pub fn is_well_formed(&self) -> bool {
        !self.title.trim().is_empty() && !self.url.trim().is_empty()
    }

    /// Fill fields this record lacks from a duplicate of the same url.
    ///
    /// Present fields are never replaced. Returns `true` if anything changed.
    pub fn enrich_from(&mut self, other: &CandidatePaper) -> bool {
        let mut changed = false;
        if self.abstract_text.is_none() && other.abstract_text.is_some() {
            self.abstract_text = other.abstract_text.clone();
            changed = true;
        }
        if self.published.is_none() && other.published.is_some() {
            self.published = other.published;
            changed = true;
        }
        if self.fulltext.is_none() && other.fulltext.is_some() {
            self.fulltext = other.fulltext.clone();
            changed = true;
        }
        if self.authors.is_empty() && !other.authors.is_empty() {
            self.authors = other.authors.clone();
            changed = true;
        }
        if self.venue.is_empty() && !other.venue.is_empty() {
            self.venue = other.venue.clone();
            changed = true;
        }
        changed
    }

    /// Strip NUL and control characters that text columns reject.
    pub fn sanitize_for_storage(&mut self) {
        self.topic = sanitize_text(&self.topic);
        self.title = sanitize_text(&self.title);
        self.venue = sanitize_text(&self.venue);
        self.url = sanitize_text(&self.url);
        for author in &mut self.authors {
            *author = sanitize_text(author);
        }
        if let Some(a) = self.abstract_text.as_mut() {
            *a = sanitize_text(a);
        }
        if let Some(f) = self.fulltext.as_mut() {
            *f = sanitize_text(f);
        }
    }
}

/// Remove NUL bytes and control characters other than `\n`, `\r`, `\t`.
pub fn sanitize_text(s: &str) -> String {
    s.chars()
        .filter(|&c| c != '\0' && (!c.is_control() || matches!(c, '\n' | '\r' | '\t')))
        .collect()
}

/// Parse a publication date from the formats sources emit.
///
/// Accepts `YYYY-MM-DD`, RFC 3339 timestamps and date-prefixed timestamps,
/// `YYYY-MM` and `YYYY` (first day of the period).
pub fn parse_published(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if s.len() > 10
        && let Some(prefix) = s.get(..10)
        && let Ok(d) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d")
    {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d") {
        return Some(d);
    }
    if s.len() == 4
        && let Ok(year) = s.parse::<i32>()
    {
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }
    None
}

/// Newest first, unknown dates last.
pub fn compare_published_desc(a: &CandidatePaper, b: &CandidatePaper) -> Ordering {
    match (a.published, b.published) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Stable sort by publication date, newest first, unknown dates last.
pub fn sort_by_published_desc(papers: &mut [CandidatePaper]) {
    papers.sort_by(compare_published_desc);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn paper(url: &str) -> CandidatePaper {
        CandidatePaper::new("topic", format!("Paper {url}"), url, SourceKind::Arxiv)
    }

    #[test]
    fn test_parse_published_formats() {
        let d = NaiveDate::from_ymd_opt(2024, 11, 3).unwrap();
        assert_eq!(parse_published("2024-11-03"), Some(d));
        assert_eq!(parse_published("2024-11-03T17:57:34Z"), Some(d));
        assert_eq!(parse_published("2024-11-03T17:57:34.123+02:00"), Some(d));
        assert_eq!(
            parse_published("2024-11"),
            NaiveDate::from_ymd_opt(2024, 11, 1)
        );
        assert_eq!(parse_published("2024"), NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(parse_published(""), None);
        assert_eq!(parse_published("last week"), None);
    }

    #[test]
    fn test_enrich_fills_missing_only() {
        let mut first = paper("https://a.org/1").with_venue("arXiv");
        let other = paper("https://a.org/1")
            .with_venue("NeurIPS")
            .with_abstract(Some("An abstract.".into()))
            .with_authors(vec!["Ada".into()])
            .with_published(NaiveDate::from_ymd_opt(2023, 5, 1));

        assert!(first.enrich_from(&other));
        assert_eq!(first.venue, "arXiv");
        assert_eq!(first.abstract_text.as_deref(), Some("An abstract."));
        assert_eq!(first.authors, vec!["Ada".to_string()]);
        assert_eq!(first.published, NaiveDate::from_ymd_opt(2023, 5, 1));

        // A second enrichment has nothing left to add.
        assert!(!first.enrich_from(&other));
    }

    #[test]
    fn test_with_abstract_drops_blank() {
        let p = paper("https://a.org/1").with_abstract(Some("   ".into()));
        assert!(p.abstract_text.is_none());
    }

    #[test]
    fn test_sort_by_published_desc_unknown_last() {
        let mut papers = vec![
            paper("u1"),
            paper("d1").with_published(NaiveDate::from_ymd_opt(2021, 1, 1)),
            paper("u2"),
            paper("d2").with_published(NaiveDate::from_ymd_opt(2024, 1, 1)),
        ];
        sort_by_published_desc(&mut papers);
        let urls: Vec<&str> = papers.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(urls, vec!["d2", "d1", "u1", "u2"]);
    }

    #[test]
    fn test_sanitize_strips_nul_and_controls() {
        let mut p = paper("https://a.org/1").with_abstract(Some("line\u{0}one\nline\u{7}two".into()));
        p.title = "Bad\u{0}Title\t".into();
        p.sanitize_for_storage();
        assert_eq!(p.title, "BadTitle\t");
        assert_eq!(p.abstract_text.as_deref(), Some("lineone\nlinetwo"));
    }

    #[test]
    fn test_storage_field_names() {
        let p = paper("https://a.org/1").with_venue("bioRxiv");
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["paper_name"], "Paper https://a.org/1");
        assert_eq!(json["journal"], "bioRxiv");
        assert!(json["abstract"].is_null());
        assert!(json["published"].is_null());
        assert_eq!(json["source"], "arxiv");
    }

    #[test]
    fn test_is_well_formed() {
        assert!(paper("https://a.org/1").is_well_formed());
        let mut p = paper("https://a.org/1");
        p.title = "  ".into();
        assert!(!p.is_well_formed());
    }
}
