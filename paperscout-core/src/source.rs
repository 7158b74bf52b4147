//! Source adapter contract.
//!
//! An adapter turns `(topic, count, cursor)` into a page of canonical
//! `CandidatePaper` records plus the cursor for its next call. Adapters
//! hold no pagination state of their own; the controller owns every cursor.

use crate::error::SourceError;
use crate::paper::CandidatePaper;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The external sources Paperscout knows how to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Arxiv,
    SemanticScholar,
    Openalex,
    Biorxiv,
    Web,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Arxiv,
        SourceKind::SemanticScholar,
        SourceKind::Openalex,
        SourceKind::Biorxiv,
        SourceKind::Web,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Arxiv => "arxiv",
            SourceKind::SemanticScholar => "semantic_scholar",
            SourceKind::Openalex => "openalex",
            SourceKind::Biorxiv => "biorxiv",
            SourceKind::Web => "web",
        }
    }

    /// Which capability tier this source belongs to.
    pub fn tier(&self) -> SourceTier {
        match self {
            SourceKind::Arxiv | SourceKind::SemanticScholar | SourceKind::Openalex => {
                SourceTier::Paginated
            }
            SourceKind::Biorxiv | SourceKind::Web => SourceTier::SingleShot,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "arxiv" => Ok(SourceKind::Arxiv),
            "semantic_scholar" | "semanticscholar" | "s2" => Ok(SourceKind::SemanticScholar),
            "openalex" => Ok(SourceKind::Openalex),
            "biorxiv" => Ok(SourceKind::Biorxiv),
            "web" | "internet" => Ok(SourceKind::Web),
            other => Err(format!("unknown source '{other}'")),
        }
    }
}

/// Capability tier of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    /// Supports repeated calls with an advancing cursor.
    Paginated,
    /// Contributes once per run; later calls are no-ops.
    SingleShot,
}

/// Per-source pagination state. Created fresh for every run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceCursor {
    pub offset: usize,
    /// Opaque continuation token for sources that hand one back.
    pub page_token: Option<String>,
    pub exhausted: bool,
}

impl SourceCursor {
    /// The cursor after consuming `n` more records.
    pub fn advanced_by(&self, n: usize) -> Self {
        Self {
            offset: self.offset + n,
            page_token: self.page_token.clone(),
            exhausted: false,
        }
    }

    /// Same position, marked exhausted.
    pub fn finished(&self) -> Self {
        Self {
            offset: self.offset,
            page_token: self.page_token.clone(),
            exhausted: true,
        }
    }

    pub fn with_page_token(mut self, token: Option<String>) -> Self {
        self.page_token = token;
        self
    }
}

/// One adapter response.
#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    pub records: Vec<CandidatePaper>,
    pub next: SourceCursor,
}

impl SourcePage {
    pub fn new(records: Vec<CandidatePaper>, next: SourceCursor) -> Self {
        Self { records, next }
    }

    /// An empty page that reports the source as exhausted.
    pub fn exhausted(cursor: &SourceCursor) -> Self {
        Self {
            records: Vec::new(),
            next: cursor.finished(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.next.exhausted
    }
}

/// A normalizing client for one external source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn tier(&self) -> SourceTier {
        self.kind().tier()
    }

    /// Fetch up to `count` records starting at `cursor`.
    ///
    /// `count` is a soft target. The returned page's `next.exhausted` tells
    /// the controller whether further calls can yield anything.
    async fn fetch(
        &self,
        topic: &str,
        count: usize,
        cursor: &SourceCursor,
    ) -> Result<SourcePage, SourceError>;
}
