//! Property-based tests for core components using proptest.

use proptest::prelude::*;

use async_trait::async_trait;
use paperscout_core::accumulate::{
    Bounds, CandidatePool, Continuation, RoundSnapshot, decide_continuation,
};
use paperscout_core::llm_json::parse_string_array;
use paperscout_core::paper::sort_by_published_desc;
use paperscout_core::{
    AccumulationController, CandidatePaper, RelevanceFilter, RelevanceVerdict, SearchConfig,
    SourceAdapter, SourceCursor, SourceError, SourceKind, SourcePage,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn paper(url: &str) -> CandidatePaper {
    CandidatePaper::new("topic", "Title", url, SourceKind::Arxiv)
}

// --- Pool deduplication properties ---

proptest! {
    #[test]
    fn pool_never_holds_duplicate_urls(
        batches in prop::collection::vec(prop::collection::vec(0u8..20, 0..15), 1..6),
        pad in prop::bool::ANY,
    ) {
        let mut pool = CandidatePool::new(1000);
        let mut distinct = HashSet::new();
        for batch in &batches {
            let records = batch
                .iter()
                .map(|i| {
                    let url = format!("https://p.org/{i}");
                    distinct.insert(url.clone());
                    if pad { paper(&format!("  {url} ")) } else { paper(&url) }
                })
                .collect();
            pool.merge(records);
        }
        let urls: HashSet<&str> = pool.papers().iter().map(|p| p.url.as_str()).collect();
        prop_assert_eq!(urls.len(), pool.len());
        prop_assert_eq!(pool.len(), distinct.len());
    }

    #[test]
    fn pool_respects_capacity(
        ids in prop::collection::vec(0u16..500, 0..200),
        capacity in 1usize..50,
    ) {
        let mut pool = CandidatePool::new(capacity);
        let report = pool.merge(ids.iter().map(|i| paper(&format!("https://p.org/{i}"))).collect());
        prop_assert!(pool.len() <= capacity);
        prop_assert_eq!(report.added, pool.len());
    }

    #[test]
    fn merge_counts_add_up(ids in prop::collection::vec(0u8..30, 0..60)) {
        let mut pool = CandidatePool::new(1000);
        let report = pool.merge(ids.iter().map(|i| paper(&format!("https://p.org/{i}"))).collect());
        prop_assert_eq!(
            report.added + report.duplicates + report.malformed + report.rejected_over_capacity,
            ids.len()
        );
    }
}

// --- Continuation decision properties ---

proptest! {
    #[test]
    fn round_bound_always_stops(
        rounds_completed in 0usize..50,
        relevant in 0usize..50,
        candidates in 0usize..500,
        added_this_round in 0usize..50,
        live_paginated in 0usize..5,
        max_rounds in 1usize..20,
    ) {
        let bounds = Bounds { top_k: 100, max_rounds, max_candidates: 1000 };
        let snapshot = RoundSnapshot {
            rounds_completed,
            relevant,
            candidates,
            added_this_round,
            live_paginated,
            cancelled: false,
        };
        let decision = decide_continuation(&snapshot, &bounds);
        if rounds_completed >= max_rounds {
            prop_assert!(matches!(decision, Continuation::Stop(_)));
        }
    }

    #[test]
    fn target_reached_stops_regardless_of_other_signals(
        top_k in 1usize..30,
        extra in 0usize..30,
        rounds_completed in 0usize..10,
    ) {
        let bounds = Bounds { top_k, max_rounds: 10, max_candidates: 1000 };
        let snapshot = RoundSnapshot {
            rounds_completed,
            relevant: top_k + extra,
            candidates: top_k + extra,
            added_this_round: 3,
            live_paginated: 2,
            cancelled: false,
        };
        prop_assert_eq!(
            decide_continuation(&snapshot, &bounds),
            Continuation::Stop(paperscout_core::StopReason::TargetReached)
        );
    }
}

// --- Accumulation termination ---

struct Infinite;

#[async_trait]
impl SourceAdapter for Infinite {
    fn kind(&self) -> SourceKind {
        SourceKind::Arxiv
    }

    async fn fetch(
        &self,
        topic: &str,
        count: usize,
        cursor: &SourceCursor,
    ) -> Result<SourcePage, SourceError> {
        let records = (cursor.offset..cursor.offset + count)
            .map(|i| CandidatePaper::new(topic, "Title", format!("https://inf.org/{i}"), SourceKind::Arxiv))
            .collect();
        Ok(SourcePage::new(records, cursor.advanced_by(count)))
    }
}

struct EveryThird;

#[async_trait]
impl RelevanceFilter for EveryThird {
    async fn classify(&self, _topic: &str, candidates: &[CandidatePaper]) -> RelevanceVerdict {
        RelevanceVerdict {
            relevant: candidates.iter().step_by(3).map(|c| c.url.clone()).collect(),
            fail_open: false,
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn accumulation_terminates_within_bounds(
        per_round in 1usize..20,
        top_k in 1usize..40,
        max_rounds in 1usize..8,
        max_candidates in 1usize..120,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let config = SearchConfig {
            sources: vec![SourceKind::Arxiv],
            candidates_per_round: per_round,
            top_k,
            max_rounds,
            max_candidates,
            call_timeout_secs: 5,
            ..SearchConfig::default()
        };
        let controller = AccumulationController::new(
            vec![Arc::new(Infinite)],
            Arc::new(EveryThird),
            config,
        );
        let outcome = runtime.block_on(controller.run("topic", CancellationToken::new()));
        prop_assert!(outcome.rounds >= 1);
        prop_assert!(outcome.rounds <= max_rounds);
        prop_assert!(outcome.candidates.len() <= max_candidates);
        prop_assert!(outcome.state.is_terminal());
    }
}

// --- Ordering and parsing ---

proptest! {
    #[test]
    fn sort_is_newest_first_with_unknown_last(
        days in prop::collection::vec(prop::option::of(0i64..5000), 0..30)
    ) {
        let base = chrono::NaiveDate::from_ymd_opt(2010, 1, 1).unwrap();
        let mut papers: Vec<CandidatePaper> = days
            .iter()
            .enumerate()
            .map(|(i, d)| {
                paper(&format!("https://d.org/{i}"))
                    .with_published(d.map(|d| base + chrono::Duration::days(d)))
            })
            .collect();
        sort_by_published_desc(&mut papers);
        for pair in papers.windows(2) {
            match (pair[0].published, pair[1].published) {
                (Some(a), Some(b)) => prop_assert!(a >= b),
                (None, Some(_)) => prop_assert!(false, "unknown date sorted before a known one"),
                _ => {}
            }
        }
    }

    #[test]
    fn parse_string_array_never_panics(text in ".{0,200}") {
        let _ = parse_string_array(&text);
    }

    #[test]
    fn parse_string_array_recovers_fenced_lists(
        urls in prop::collection::vec("https://[a-z]{1,10}\\.org/[0-9]{1,4}", 0..10)
    ) {
        let body = serde_json::to_string(&urls).unwrap();
        let fenced = format!("Here you go:\n```json\n{body}\n```");
        prop_assert_eq!(parse_string_array(&fenced), Some(urls));
    }
}
