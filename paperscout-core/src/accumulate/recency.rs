//! Optional publication-date cutoff.

use super::pool::CandidatePool;
use crate::paper::CandidatePaper;
use chrono::{Duration, NaiveDate, Utc};
use tracing::info;

/// Drops candidates older than `months × 30` days. Unknown dates are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecencyFilter {
    max_age_months: u32,
}

impl RecencyFilter {
    /// `0` disables the filter.
    pub fn new(max_age_months: u32) -> Self {
        Self { max_age_months }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_age_months > 0
    }

    /// The oldest accepted publication date, if the filter is enabled.
    pub fn cutoff(&self, today: NaiveDate) -> Option<NaiveDate> {
        if !self.is_enabled() {
            return None;
        }
        today.checked_sub_signed(Duration::days(i64::from(self.max_age_months) * 30))
    }

    pub fn keeps(&self, paper: &CandidatePaper, today: NaiveDate) -> bool {
        match (self.cutoff(today), paper.published) {
            (Some(cutoff), Some(published)) => published >= cutoff,
            _ => true,
        }
    }

    /// Remove stale candidates from `pool`, returning how many were dropped.
    pub fn apply_at(&self, pool: &mut CandidatePool, today: NaiveDate) -> usize {
        let Some(cutoff) = self.cutoff(today) else {
            return 0;
        };
        let dropped = pool.retain(|p| self.keeps(p, today));
        if dropped > 0 {
            info!(
                cutoff = %cutoff,
                kept = pool.len(),
                dropped,
                "Recency filter applied"
            );
        }
        dropped
    }

    pub fn apply(&self, pool: &mut CandidatePool) -> usize {
        self.apply_at(pool, Utc::now().date_naive())
    }
}
