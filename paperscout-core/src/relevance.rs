//! Relevance filter: the precision gate applied to the accumulated pool.
//!
//! One batched model call judges every candidate at once. A failed or
//! unparseable call is retried once; if the retry fails too the whole batch
//! is passed through as provisionally relevant and the final selector
//! applies the stricter judgment.

use crate::brain::{self, LlmProvider};
use crate::error::LlmError;
use crate::llm_json;
use crate::paper::CandidatePaper;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Abstracts longer than this are cut before being sent to the model.
pub const ABSTRACT_PROMPT_CHARS: usize = 1200;

const SYSTEM_PROMPT: &str = "You are a meticulous research librarian. You decide which papers \
are DIRECTLY about a research topic. Papers that are merely adjacent, use the topic as a minor \
example, or share only keywords are NOT relevant. You answer with JSON only.";

/// The outcome of one classification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelevanceVerdict {
    /// Urls judged directly relevant. Always a subset of the batch.
    pub relevant: HashSet<String>,
    /// True when classification failed and the batch was passed through.
    pub fail_open: bool,
}

impl RelevanceVerdict {
    pub fn len(&self) -> usize {
        self.relevant.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relevant.is_empty()
    }

    fn pass_through(candidates: &[CandidatePaper]) -> Self {
        Self {
            relevant: candidates.iter().map(|c| c.url.clone()).collect(),
            fail_open: true,
        }
    }
}

/// Labels each candidate as directly relevant or not.
#[async_trait]
pub trait RelevanceFilter: Send + Sync {
    /// Classify the whole batch in one invocation. Never fails.
    async fn classify(&self, topic: &str, candidates: &[CandidatePaper]) -> RelevanceVerdict;
}

/// Model-backed relevance filter.
pub struct LlmRelevanceFilter {
    provider: Arc<dyn LlmProvider>,
    max_tokens: usize,
    attempts: usize,
}

impl LlmRelevanceFilter {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            max_tokens: 4096,
            attempts: 2,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    async fn classify_once(
        &self,
        topic: &str,
        candidates: &[CandidatePaper],
        batch: &HashSet<&str>,
    ) -> Result<HashSet<String>, LlmError> {
        let prompt = build_prompt(topic, candidates);
        let reply = brain::ask(
            self.provider.as_ref(),
            SYSTEM_PROMPT,
            prompt,
            0.0,
            Some(self.max_tokens),
        )
        .await?;

        let urls = llm_json::parse_string_array(&reply).ok_or_else(|| LlmError::ResponseParse {
            message: "relevance answer is not a JSON array of urls".to_string(),
        })?;

        let mut relevant = HashSet::new();
        for url in urls {
            if batch.contains(url.as_str()) {
                relevant.insert(url);
            } else {
                debug!(url = url.as_str(), "Ignoring url not present in the batch");
            }
        }
        Ok(relevant)
    }
}

#[async_trait]
impl RelevanceFilter for LlmRelevanceFilter {
    async fn classify(&self, topic: &str, candidates: &[CandidatePaper]) -> RelevanceVerdict {
        if candidates.is_empty() {
            return RelevanceVerdict::default();
        }
        let batch: HashSet<&str> = candidates.iter().map(|c| c.url.as_str()).collect();

        for attempt in 1..=self.attempts {
            match self.classify_once(topic, candidates, &batch).await {
                Ok(relevant) => {
                    info!(
                        topic,
                        total = candidates.len(),
                        relevant = relevant.len(),
                        "Relevance classification complete"
                    );
                    return RelevanceVerdict {
                        relevant,
                        fail_open: false,
                    };
                }
                Err(e) => {
                    warn!(
                        topic,
                        attempt,
                        max = self.attempts,
                        error = %e,
                        "Relevance classification failed"
                    );
                }
            }
        }

        warn!(
            topic,
            count = candidates.len(),
            "Relevance filter failing open: whole batch kept as provisionally relevant"
        );
        RelevanceVerdict::pass_through(candidates)
    }
}

/// Cut `text` to at most `max` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// One numbered block per candidate. `fulltext` is never included.
pub(crate) fn describe_candidates(candidates: &[CandidatePaper]) -> String {
    let mut out = String::new();
    for (i, c) in candidates.iter().enumerate() {
        let published = c
            .published
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let authors = if c.authors.is_empty() {
            "unknown".to_string()
        } else {
            c.authors.join(", ")
        };
        let venue = if c.venue.is_empty() { "unknown" } else { &c.venue };
        let abstract_text = c
            .abstract_text
            .as_deref()
            .map(|a| truncate_chars(a, ABSTRACT_PROMPT_CHARS))
            .unwrap_or_else(|| "(no abstract)".to_string());
        out.push_str(&format!(
            "{}. URL: {}\n   Title: {}\n   Authors: {}\n   Published: {}\n   Venue: {}\n   Abstract: {}\n\n",
            i + 1,
            c.url,
            c.title,
            authors,
            published,
            venue,
            abstract_text
        ));
    }
    out
}

fn build_prompt(topic: &str, candidates: &[CandidatePaper]) -> String {
    format!(
        "Topic: {topic}\n\nCandidates:\n\n{}Return ONLY a JSON array containing the URLs of the \
papers that are directly relevant to the topic, copied exactly as given. Return [] if none are.",
        describe_candidates(candidates)
    )
}
