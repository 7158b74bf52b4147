//! Run registry: trigger, status and cancel keyed by `(topic, user)`.
//!
//! At most one active run exists per key. A trigger for a key whose run is
//! still scraping or debating is ignored with a warning; a trigger after a
//! terminal phase replaces the entry.

use crate::accumulate::{RoundProgress, StopReason};
use crate::error::PaperscoutError;
use crate::pipeline::{Pipeline, PipelineObserver, RunPhase, RunReport, RunRequest};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Identity of a run: normalized topic plus user (`"anon"` when absent).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunKey {
    pub topic: String,
    pub user_id: String,
}

impl RunKey {
    pub fn new(topic: &str, user_id: Option<&str>) -> Self {
        let user = user_id.map(str::trim).filter(|u| !u.is_empty());
        Self {
            topic: topic.trim().to_lowercase(),
            user_id: user.unwrap_or("anon").to_string(),
        }
    }

    pub fn for_request(request: &RunRequest) -> Self {
        Self::new(&request.topic, request.user_id.as_deref())
    }
}

impl std::fmt::Display for RunKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.user_id, self.topic)
    }
}

/// Snapshot of a run for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub run_id: Uuid,
    pub phase: RunPhase,
    pub papers_found: usize,
    pub papers_relevant: usize,
    pub papers_analyzed: usize,
    /// Completed accumulation rounds.
    pub round: usize,
    pub stop_reason: Option<StopReason>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunStatus {
    fn started(run_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            phase: RunPhase::Scraping,
            papers_found: 0,
            papers_relevant: 0,
            papers_analyzed: 0,
            round: 0,
            stop_reason: None,
            error: None,
            started_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TriggerOutcome {
    Started { run_id: Uuid },
    AlreadyRunning(Box<RunStatus>),
}

struct RunEntry {
    status: RunStatus,
    cancel: CancellationToken,
    handle: Option<JoinHandle<RunReport>>,
}

type RunMap = Arc<Mutex<HashMap<RunKey, RunEntry>>>;

fn lock(runs: &RunMap) -> MutexGuard<'_, HashMap<RunKey, RunEntry>> {
    runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mirrors pipeline progress into one registry entry.
struct EntryObserver {
    runs: RunMap,
    key: RunKey,
    run_id: Uuid,
}

impl EntryObserver {
    fn update(&self, f: impl FnOnce(&mut RunStatus)) {
        let mut runs = lock(&self.runs);
        if let Some(entry) = runs.get_mut(&self.key)
            && entry.status.run_id == self.run_id
        {
            f(&mut entry.status);
            entry.status.updated_at = Utc::now();
        }
    }

    fn finish(&self, report: &RunReport) {
        self.update(|status| {
            status.phase = report.phase;
            status.stop_reason = Some(report.stop_reason);
            status.papers_found = report.candidates_found;
            status.papers_relevant = report.relevant_found;
            status.papers_analyzed = report.papers_analyzed;
            status.round = report.rounds;
            status.error = report.error.clone();
        });
    }
}

impl PipelineObserver for EntryObserver {
    fn on_round(&self, progress: &RoundProgress) {
        self.update(|status| {
            status.round = progress.round + 1;
            status.papers_found = progress.candidates;
            status.papers_relevant = progress.relevant;
        });
    }

    fn on_phase(&self, phase: RunPhase) {
        self.update(|status| status.phase = phase);
    }
}

/// Owns every run started through it.
#[derive(Clone)]
pub struct RunRegistry {
    pipeline: Arc<Pipeline>,
    runs: RunMap,
}

impl RunRegistry {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validate and start a run, returning immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn trigger(&self, request: RunRequest) -> Result<TriggerOutcome, PaperscoutError> {
        self.pipeline.validate(&request)?;
        let key = RunKey::for_request(&request);

        let mut runs = lock(&self.runs);
        if let Some(existing) = runs.get(&key)
            && existing.status.phase.is_active()
        {
            warn!(
                key = %key,
                run_id = %existing.status.run_id,
                phase = %existing.status.phase,
                "Run already in progress, ignoring duplicate trigger"
            );
            return Ok(TriggerOutcome::AlreadyRunning(Box::new(
                existing.status.clone(),
            )));
        }

        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let observer = Arc::new(EntryObserver {
            runs: self.runs.clone(),
            key: key.clone(),
            run_id,
        });
        let pipeline = self.pipeline.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let report = pipeline.run(&request, token, observer.clone()).await;
            observer.finish(&report);
            report
        });

        info!(key = %key, run_id = %run_id, "Run started");
        runs.insert(
            key,
            RunEntry {
                status: RunStatus::started(run_id),
                cancel,
                handle: Some(handle),
            },
        );
        Ok(TriggerOutcome::Started { run_id })
    }

    /// Current status, or `None` for a key that never ran.
    pub fn status(&self, key: &RunKey) -> Option<RunStatus> {
        lock(&self.runs).get(key).map(|e| e.status.clone())
    }

    /// Request cancellation. Returns whether an active run was signalled.
    pub fn cancel(&self, key: &RunKey) -> bool {
        let runs = lock(&self.runs);
        match runs.get(key) {
            Some(entry) if entry.status.phase.is_active() => {
                if !entry.cancel.is_cancelled() {
                    info!(key = %key, run_id = %entry.status.run_id, "Cancellation requested");
                }
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Await the run for `key` and return its report.
    ///
    /// Only the first waiter receives the report.
    pub async fn wait(&self, key: &RunKey) -> Option<RunReport> {
        let handle = lock(&self.runs).get_mut(key)?.handle.take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(key = %key, error = %e, "Run task failed");
                None
            }
        }
    }

    /// Number of runs still scraping or debating.
    pub fn active_runs(&self) -> usize {
        lock(&self.runs)
            .values()
            .filter(|e| e.status.phase.is_active())
            .count()
    }
}
