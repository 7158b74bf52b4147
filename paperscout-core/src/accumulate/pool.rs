//! Url-keyed candidate pool with enrichment on duplicate.

use crate::paper::CandidatePaper;
use std::collections::{HashMap, HashSet};

/// What one merge did to the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    pub enriched: usize,
    pub duplicates: usize,
    pub malformed: usize,
    pub rejected_over_capacity: usize,
}

impl MergeReport {
    pub fn absorb(&mut self, other: MergeReport) {
        self.added += other.added;
        self.enriched += other.enriched;
        self.duplicates += other.duplicates;
        self.malformed += other.malformed;
        self.rejected_over_capacity += other.rejected_over_capacity;
    }
}

/// Insertion-ordered pool; no two entries share a url.
///
/// Urls removed by `retain` are remembered and never re-admitted.
#[derive(Debug, Clone)]
pub struct CandidatePool {
    papers: Vec<CandidatePaper>,
    index: HashMap<String, usize>,
    evicted: HashSet<String>,
    capacity: usize,
}

impl CandidatePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            papers: Vec::new(),
            index: HashMap::new(),
            evicted: HashSet::new(),
            capacity,
        }
    }

    /// Merge a batch. First-seen wins; later duplicates only enrich.
    pub fn merge(&mut self, batch: Vec<CandidatePaper>) -> MergeReport {
        let mut report = MergeReport::default();
        for mut paper in batch {
            paper.url = paper.url.trim().to_string();
            if !paper.is_well_formed() {
                report.malformed += 1;
                continue;
            }
            if self.evicted.contains(&paper.url) {
                report.duplicates += 1;
                continue;
            }
            if let Some(&idx) = self.index.get(&paper.url) {
                report.duplicates += 1;
                if self.papers[idx].enrich_from(&paper) {
                    report.enriched += 1;
                }
                continue;
            }
            if self.is_full() {
                report.rejected_over_capacity += 1;
                continue;
            }
            self.index.insert(paper.url.clone(), self.papers.len());
            self.papers.push(paper);
            report.added += 1;
        }
        report
    }

    /// Keep only papers matching `keep`. Returns how many were dropped.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&CandidatePaper) -> bool,
    {
        let before = self.papers.len();
        let evicted = &mut self.evicted;
        self.papers.retain(|p| {
            let kept = keep(p);
            if !kept {
                evicted.insert(p.url.clone());
            }
            kept
        });
        self.index = self
            .papers
            .iter()
            .enumerate()
            .map(|(i, p)| (p.url.clone(), i))
            .collect();
        before - self.papers.len()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.index.contains_key(url)
    }

    pub fn get(&self, url: &str) -> Option<&CandidatePaper> {
        self.index.get(url).map(|&i| &self.papers[i])
    }

    pub fn papers(&self) -> &[CandidatePaper] {
        &self.papers
    }

    pub fn into_papers(self) -> Vec<CandidatePaper> {
        self.papers
    }

    pub fn len(&self) -> usize {
        self.papers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.papers.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.papers.len() >= self.capacity
    }
}
