//! Final selector: ranks the relevant set and truncates it to `top_k`.

use crate::brain::{self, LlmProvider};
use crate::llm_json;
use crate::paper::{CandidatePaper, sort_by_published_desc};
use crate::relevance::describe_candidates;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You are a senior researcher curating a reading list. You rank \
papers by how directly and substantially they address a topic. You answer with JSON only.";

/// How a selection was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    /// Nothing to choose; every candidate returned.
    PassThrough,
    /// Ordered by the ranking model.
    Ranked,
    /// Ranking unavailable; newest first.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub papers: Vec<CandidatePaper>,
    pub method: SelectionMethod,
}

/// Picks the ordered output set from the relevant candidates.
#[async_trait]
pub trait FinalSelector: Send + Sync {
    /// Return at most `top_k` candidates, best first. Never fails.
    async fn select(&self, topic: &str, candidates: Vec<CandidatePaper>, top_k: usize)
    -> Selection;
}

/// Model-backed selector with a deterministic date-order fallback.
pub struct LlmFinalSelector {
    provider: Arc<dyn LlmProvider>,
    max_tokens: usize,
}

impl LlmFinalSelector {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            max_tokens: 4096,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Newest first, truncated.
fn fallback(mut candidates: Vec<CandidatePaper>, top_k: usize) -> Vec<CandidatePaper> {
    sort_by_published_desc(&mut candidates);
    candidates.truncate(top_k);
    candidates
}

/// Order `candidates` by `ranking`, topping up from the rest by date.
fn apply_ranking(
    candidates: Vec<CandidatePaper>,
    ranking: &[String],
    top_k: usize,
) -> Vec<CandidatePaper> {
    let mut by_url: HashMap<String, CandidatePaper> = HashMap::new();
    let mut order: Vec<String> = Vec::with_capacity(candidates.len());
    for c in candidates {
        order.push(c.url.clone());
        by_url.insert(c.url.clone(), c);
    }

    let mut picked = Vec::with_capacity(top_k);
    let mut seen = HashSet::new();
    for url in ranking {
        if picked.len() == top_k {
            break;
        }
        if !seen.insert(url.as_str()) {
            continue;
        }
        if let Some(c) = by_url.remove(url) {
            picked.push(c);
        }
    }

    if picked.len() < top_k {
        let mut rest: Vec<CandidatePaper> = order
            .iter()
            .filter_map(|url| by_url.remove(url))
            .collect();
        sort_by_published_desc(&mut rest);
        let missing = top_k - picked.len();
        picked.extend(rest.into_iter().take(missing));
    }
    picked
}

fn build_prompt(topic: &str, candidates: &[CandidatePaper], top_k: usize) -> String {
    format!(
        "Topic: {topic}\n\nCandidates:\n\n{}Select the {top_k} papers most valuable for \
understanding this topic and rank them best first. Return ONLY a JSON array of their URLs, \
copied exactly as given.",
        describe_candidates(candidates)
    )
}

#[async_trait]
impl FinalSelector for LlmFinalSelector {
    async fn select(
        &self,
        topic: &str,
        candidates: Vec<CandidatePaper>,
        top_k: usize,
    ) -> Selection {
        if candidates.len() <= top_k {
            let mut papers = candidates;
            sort_by_published_desc(&mut papers);
            return Selection {
                papers,
                method: SelectionMethod::PassThrough,
            };
        }

        let prompt = build_prompt(topic, &candidates, top_k);
        let reply = brain::ask(
            self.provider.as_ref(),
            SYSTEM_PROMPT,
            prompt,
            0.0,
            Some(self.max_tokens),
        )
        .await;

        let ranking = match reply {
            Ok(text) => llm_json::parse_string_array(&text),
            Err(e) => {
                warn!(topic, error = %e, "Final ranking call failed, falling back to date order");
                None
            }
        };

        let ranking = ranking.filter(|urls| {
            let known: HashSet<&str> = candidates.iter().map(|c| c.url.as_str()).collect();
            urls.iter().any(|u| known.contains(u.as_str()))
        });
        match ranking {
            Some(urls) => {
                let papers = apply_ranking(candidates, &urls, top_k);
                info!(topic, selected = papers.len(), "Final selection ranked");
                Selection {
                    papers,
                    method: SelectionMethod::Ranked,
                }
            }
            None => {
                warn!(topic, top_k, "Final ranking unusable, selecting newest candidates");
                Selection {
                    papers: fallback(candidates, top_k),
                    method: SelectionMethod::Fallback,
                }
            }
        }
    }
}
