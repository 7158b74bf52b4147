//! Run states, stop reasons and the continuation decision.

use super::pool::CandidatePool;
use crate::config::SearchConfig;
use crate::paper::CandidatePaper;
use crate::source::{SourceCursor, SourceKind, SourceTier};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Controller state machine: `Round0 → Accumulating → Converged | Exhausted | Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Round0,
    Accumulating,
    Converged,
    Exhausted,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Converged | RunState::Exhausted | RunState::Cancelled
        )
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    MaxRounds,
    MaxCandidates,
    NoNewCandidates,
    SourcesExhausted,
    Cancelled,
}

impl StopReason {
    pub fn terminal_state(&self) -> RunState {
        match self {
            StopReason::TargetReached => RunState::Converged,
            StopReason::Cancelled => RunState::Cancelled,
            StopReason::MaxRounds
            | StopReason::MaxCandidates
            | StopReason::NoNewCandidates
            | StopReason::SourcesExhausted => RunState::Exhausted,
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::TargetReached => "target_reached",
            StopReason::MaxRounds => "max_rounds",
            StopReason::MaxCandidates => "max_candidates",
            StopReason::NoNewCandidates => "no_new_candidates",
            StopReason::SourcesExhausted => "sources_exhausted",
            StopReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Hard limits of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub top_k: usize,
    pub max_rounds: usize,
    pub max_candidates: usize,
}

impl From<&SearchConfig> for Bounds {
    fn from(config: &SearchConfig) -> Self {
        Self {
            top_k: config.top_k,
            max_rounds: config.max_rounds,
            max_candidates: config.max_candidates,
        }
    }
}

/// What the continuation decision looks at after a round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSnapshot {
    pub rounds_completed: usize,
    pub relevant: usize,
    pub candidates: usize,
    pub added_this_round: usize,
    /// Enabled paginated sources whose cursor is not exhausted.
    pub live_paginated: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    Continue,
    Stop(StopReason),
}

/// The single place that decides whether another round runs.
///
/// Checked in order: cancellation, target reached, round bound, candidate
/// bound, paginated sources exhausted, no new candidates.
///
/// `relevant` includes urls passed through by a fail-open round, so such a
/// round alone can reach `top_k`. The run then stops with `TargetReached`
/// and the outcome carries a non-zero `fail_open_rounds`.
pub fn decide_continuation(snapshot: &RoundSnapshot, bounds: &Bounds) -> Continuation {
    if snapshot.cancelled {
        return Continuation::Stop(StopReason::Cancelled);
    }
    if snapshot.relevant >= bounds.top_k {
        return Continuation::Stop(StopReason::TargetReached);
    }
    if snapshot.rounds_completed >= bounds.max_rounds {
        return Continuation::Stop(StopReason::MaxRounds);
    }
    if snapshot.candidates >= bounds.max_candidates {
        return Continuation::Stop(StopReason::MaxCandidates);
    }
    if snapshot.live_paginated == 0 {
        return Continuation::Stop(StopReason::SourcesExhausted);
    }
    if snapshot.added_this_round == 0 {
        return Continuation::Stop(StopReason::NoNewCandidates);
    }
    Continuation::Continue
}

/// Transient per-run state, owned by one controller.
#[derive(Debug, Clone)]
pub struct RoundState {
    pub state: RunState,
    pub pool: CandidatePool,
    /// Urls confirmed relevant by a successful classification. Only grows,
    /// except for urls that leave the pool.
    pub relevant: HashSet<String>,
    /// Urls passed through by the latest fail-open classification.
    pub provisional: HashSet<String>,
    /// Completed rounds.
    pub round: usize,
    pub cursors: HashMap<SourceKind, SourceCursor>,
    pub enabled: Vec<(SourceKind, SourceTier)>,
    pub used_single_shot: HashSet<SourceKind>,
}

impl RoundState {
    pub fn new(enabled: Vec<(SourceKind, SourceTier)>, max_candidates: usize) -> Self {
        let cursors = enabled
            .iter()
            .map(|(kind, _)| (*kind, SourceCursor::default()))
            .collect();
        Self {
            state: RunState::Round0,
            pool: CandidatePool::new(max_candidates),
            relevant: HashSet::new(),
            provisional: HashSet::new(),
            round: 0,
            cursors,
            enabled,
            used_single_shot: HashSet::new(),
        }
    }

    /// Sources to invoke in the next round, with their cursors.
    ///
    /// Round 0 calls everything; later rounds only paginated sources with a
    /// live cursor. A single-shot source is never called twice.
    pub fn sources_for_round(&self) -> Vec<(SourceKind, SourceCursor)> {
        self.enabled
            .iter()
            .filter(|(kind, tier)| match tier {
                SourceTier::SingleShot => self.round == 0 && !self.used_single_shot.contains(kind),
                SourceTier::Paginated => !self.cursor(*kind).exhausted,
            })
            .map(|(kind, _)| (*kind, self.cursor(*kind)))
            .collect()
    }

    pub fn cursor(&self, kind: SourceKind) -> SourceCursor {
        self.cursors.get(&kind).cloned().unwrap_or_default()
    }

    pub fn live_paginated(&self) -> usize {
        self.enabled
            .iter()
            .filter(|(kind, tier)| *tier == SourceTier::Paginated && !self.cursor(*kind).exhausted)
            .count()
    }

    /// Confirmed plus provisionally relevant urls still in the pool.
    pub fn relevant_urls(&self) -> HashSet<&str> {
        self.relevant
            .iter()
            .chain(self.provisional.iter())
            .map(String::as_str)
            .filter(|url| self.pool.contains(url))
            .collect()
    }

    /// Relevant candidates in pool insertion order.
    pub fn relevant_papers(&self) -> Vec<CandidatePaper> {
        let urls = self.relevant_urls();
        self.pool
            .papers()
            .iter()
            .filter(|p| urls.contains(p.url.as_str()))
            .cloned()
            .collect()
    }

    /// Fold one classification verdict into the relevant sets.
    pub fn absorb_verdict(&mut self, relevant: HashSet<String>, fail_open: bool) {
        if fail_open {
            self.provisional = relevant;
        } else {
            self.provisional.clear();
            self.relevant.extend(relevant);
        }
        let pool = &self.pool;
        self.relevant.retain(|url| pool.contains(url));
        self.provisional.retain(|url| pool.contains(url));
    }
}
