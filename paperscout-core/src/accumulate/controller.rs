//! The round-based accumulation loop.
//!
//! Each round fans out to the scheduled adapters concurrently, merges and
//! deduplicates their pages, applies the recency cutoff, reclassifies the
//! full pool and asks `decide_continuation` whether to go again. Rounds are
//! strictly sequential. A round's work is done on a copy of the state and
//! committed only if cancellation was not observed while it ran.

use super::recency::RecencyFilter;
use super::state::{
    Bounds, Continuation, RoundSnapshot, RoundState, RunState, StopReason, decide_continuation,
};
use crate::config::SearchConfig;
use crate::error::SourceError;
use crate::paper::CandidatePaper;
use crate::relevance::RelevanceFilter;
use crate::source::{SourceAdapter, SourceKind, SourcePage, SourceTier};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress emitted after every completed round.
#[derive(Debug, Clone, Serialize)]
pub struct RoundProgress {
    /// Zero-based index of the round that just completed.
    pub round: usize,
    pub state: RunState,
    pub candidates: usize,
    pub relevant: usize,
    pub added: usize,
    pub failed_sources: Vec<SourceKind>,
}

pub type ProgressCallback = Arc<dyn Fn(&RoundProgress) + Send + Sync>;

/// Everything a run produced, whatever way it ended.
#[derive(Debug, Clone)]
pub struct AccumulationOutcome {
    pub state: RunState,
    pub stop_reason: StopReason,
    /// Completed rounds.
    pub rounds: usize,
    pub candidates: Vec<CandidatePaper>,
    pub relevant: Vec<CandidatePaper>,
    /// Adapter invocations per source.
    pub adapter_calls: HashMap<SourceKind, usize>,
    /// Rounds whose classification failed open.
    pub fail_open_rounds: usize,
}

/// Drives one run over a fixed set of adapters.
pub struct AccumulationController {
    sources: Vec<Arc<dyn SourceAdapter>>,
    filter: Arc<dyn RelevanceFilter>,
    config: SearchConfig,
    progress: Option<ProgressCallback>,
}

struct RoundResult {
    next: RoundState,
    added: usize,
    failed: Vec<SourceKind>,
    fail_open: bool,
}

impl AccumulationController {
    pub fn new(
        sources: Vec<Arc<dyn SourceAdapter>>,
        filter: Arc<dyn RelevanceFilter>,
        config: SearchConfig,
    ) -> Self {
        Self {
            sources,
            filter,
            config,
            progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    fn adapter(&self, kind: SourceKind) -> Option<&Arc<dyn SourceAdapter>> {
        self.sources.iter().find(|s| s.kind() == kind)
    }

    /// Run rounds until the continuation decision stops or `cancel` fires.
    pub async fn run(&self, topic: &str, cancel: CancellationToken) -> AccumulationOutcome {
        let bounds = Bounds::from(&self.config);
        let recency = RecencyFilter::new(self.config.max_age_months);
        let enabled: Vec<(SourceKind, SourceTier)> =
            self.sources.iter().map(|s| (s.kind(), s.tier())).collect();

        let mut state = RoundState::new(enabled, self.config.max_candidates);
        let mut adapter_calls: HashMap<SourceKind, usize> = HashMap::new();
        let mut fail_open_rounds = 0;

        info!(
            topic,
            sources = self.sources.len(),
            top_k = bounds.top_k,
            max_rounds = bounds.max_rounds,
            "Starting accumulation"
        );

        let stop_reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let scheduled = state.sources_for_round();
            for (kind, _) in &scheduled {
                *adapter_calls.entry(*kind).or_default() += 1;
            }

            let round = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.run_round(topic, &state, &scheduled, &recency) => Some(result),
            };
            let Some(result) = round else {
                info!(
                    topic,
                    round = state.round,
                    "Cancellation observed mid-round, discarding its results"
                );
                break StopReason::Cancelled;
            };
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            state = result.next;
            if result.fail_open {
                fail_open_rounds += 1;
            }

            let snapshot = RoundSnapshot {
                rounds_completed: state.round,
                relevant: state.relevant_urls().len(),
                candidates: state.pool.len(),
                added_this_round: result.added,
                live_paginated: state.live_paginated(),
                cancelled: false,
            };
            let decision = decide_continuation(&snapshot, &bounds);
            state.state = match decision {
                Continuation::Continue => RunState::Accumulating,
                Continuation::Stop(reason) => reason.terminal_state(),
            };

            info!(
                topic,
                round = state.round - 1,
                candidates = snapshot.candidates,
                relevant = snapshot.relevant,
                added = snapshot.added_this_round,
                ?decision,
                "Round complete"
            );

            if let Some(callback) = &self.progress {
                callback(&RoundProgress {
                    round: state.round - 1,
                    state: state.state,
                    candidates: snapshot.candidates,
                    relevant: snapshot.relevant,
                    added: snapshot.added_this_round,
                    failed_sources: result.failed,
                });
            }

            if let Continuation::Stop(reason) = decision {
                break reason;
            }
        };

        state.state = stop_reason.terminal_state();
        info!(
            topic,
            state = ?state.state,
            reason = %stop_reason,
            rounds = state.round,
            candidates = state.pool.len(),
            "Accumulation finished"
        );

        let relevant = state.relevant_papers();
        AccumulationOutcome {
            state: state.state,
            stop_reason,
            rounds: state.round,
            candidates: state.pool.into_papers(),
            relevant,
            adapter_calls,
            fail_open_rounds,
        }
    }

    /// Fetch, merge, filter and classify one round on a copy of `current`.
    async fn run_round(
        &self,
        topic: &str,
        current: &RoundState,
        scheduled: &[(SourceKind, crate::source::SourceCursor)],
        recency: &RecencyFilter,
    ) -> RoundResult {
        let mut next = current.clone();
        let count = self.config.candidates_per_round;
        let timeout = Duration::from_secs(self.config.call_timeout_secs);

        let calls = scheduled.iter().filter_map(|(kind, cursor)| {
            let adapter = self.adapter(*kind)?.clone();
            let cursor = cursor.clone();
            Some(async move {
                let outcome = match tokio::time::timeout(timeout, adapter.fetch(topic, count, &cursor))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Timeout {
                        source_name: adapter.kind().to_string(),
                        timeout_secs: timeout.as_secs(),
                    }),
                };
                (adapter.kind(), adapter.tier(), cursor, outcome)
            })
        });
        let results = join_all(calls).await;

        let mut failed = Vec::new();
        for (kind, tier, cursor, outcome) in results {
            if tier == SourceTier::SingleShot {
                next.used_single_shot.insert(kind);
            }
            match outcome {
                Ok(SourcePage { records, next: next_cursor }) => {
                    let fetched = records.len();
                    let report = next.pool.merge(records);
                    debug!(
                        topic,
                        source = %kind,
                        fetched,
                        added = report.added,
                        enriched = report.enriched,
                        exhausted = next_cursor.exhausted,
                        "Source page merged"
                    );
                    if report.rejected_over_capacity > 0 {
                        warn!(
                            topic,
                            source = %kind,
                            rejected = report.rejected_over_capacity,
                            capacity = next.pool.capacity(),
                            "Candidate pool full, dropping new records"
                        );
                    }
                    let next_cursor = if tier == SourceTier::SingleShot {
                        next_cursor.finished()
                    } else {
                        next_cursor
                    };
                    next.cursors.insert(kind, next_cursor);
                }
                Err(e) => {
                    warn!(
                        topic,
                        source = %kind,
                        error = %e,
                        "Source failed, contributing nothing this round"
                    );
                    failed.push(kind);
                    let keep = if tier == SourceTier::SingleShot {
                        cursor.finished()
                    } else {
                        cursor
                    };
                    next.cursors.insert(kind, keep);
                }
            }
        }

        recency.apply(&mut next.pool);
        // New this round and still present after the cutoff. Expiring an
        // older entry does not cancel out a fresh one.
        let added = next
            .pool
            .papers()
            .iter()
            .filter(|p| !current.pool.contains(&p.url))
            .count();

        let verdict = self.filter.classify(topic, next.pool.papers()).await;
        let fail_open = verdict.fail_open;
        next.absorb_verdict(verdict.relevant, verdict.fail_open);
        next.round += 1;

        RoundResult {
            next,
            added,
            failed,
            fail_open,
        }
    }
}
