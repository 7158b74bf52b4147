//! End-to-end run: accumulate → select → store → optional downstream stage.

use crate::accumulate::{AccumulationController, ProgressCallback, RoundProgress, StopReason};
use crate::config::SearchConfig;
use crate::error::RunError;
use crate::paper::{CandidatePaper, sort_by_published_desc};
use crate::relevance::RelevanceFilter;
use crate::selector::{FinalSelector, SelectionMethod};
use crate::sink::{ResultSink, SinkReport};
use crate::source::SourceAdapter;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Externally visible phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Scraping,
    Debating,
    Complete,
    Error,
    Cancelled,
}

impl RunPhase {
    pub fn is_active(&self) -> bool {
        matches!(self, RunPhase::Scraping | RunPhase::Debating)
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Scraping => write!(f, "scraping"),
            RunPhase::Debating => write!(f, "debating"),
            RunPhase::Complete => write!(f, "complete"),
            RunPhase::Error => write!(f, "error"),
            RunPhase::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A request to start one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub topic: String,
    pub user_id: Option<String>,
    pub search: SearchConfig,
}

impl RunRequest {
    pub fn new(topic: impl Into<String>, search: SearchConfig) -> Self {
        Self {
            topic: topic.into(),
            user_id: None,
            search,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

pub type StageError = Box<dyn std::error::Error + Send + Sync>;

/// The stage that consumes stored selections (e.g. a debate over each paper).
#[async_trait]
pub trait DownstreamStage: Send + Sync {
    fn name(&self) -> &str;

    /// Process the selection, returning how many papers were analyzed.
    async fn process(
        &self,
        topic: &str,
        tenant: Option<&str>,
        papers: &[CandidatePaper],
    ) -> Result<usize, StageError>;
}

/// Receives run progress as it happens.
pub trait PipelineObserver: Send + Sync {
    fn on_round(&self, _progress: &RoundProgress) {}
    fn on_phase(&self, _phase: RunPhase) {}
}

/// Observer that ignores everything.
pub struct NoOpObserver;

impl PipelineObserver for NoOpObserver {}

/// What a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub topic: String,
    pub phase: RunPhase,
    pub stop_reason: StopReason,
    pub rounds: usize,
    pub candidates_found: usize,
    pub relevant_found: usize,
    pub fail_open_rounds: usize,
    pub selected: Vec<CandidatePaper>,
    pub selection_method: Option<SelectionMethod>,
    pub sink: Option<SinkReport>,
    pub sink_error: Option<String>,
    pub papers_analyzed: usize,
    pub error: Option<String>,
}

/// The wired-up collaborators of a run.
pub struct Pipeline {
    sources: Vec<Arc<dyn SourceAdapter>>,
    filter: Arc<dyn RelevanceFilter>,
    selector: Arc<dyn FinalSelector>,
    sink: Option<Arc<dyn ResultSink>>,
    downstream: Option<Arc<dyn DownstreamStage>>,
}

impl Pipeline {
    pub fn new(
        sources: Vec<Arc<dyn SourceAdapter>>,
        filter: Arc<dyn RelevanceFilter>,
        selector: Arc<dyn FinalSelector>,
    ) -> Self {
        Self {
            sources,
            filter,
            selector,
            sink: None,
            downstream: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_downstream(mut self, stage: Arc<dyn DownstreamStage>) -> Self {
        self.downstream = Some(stage);
        self
    }

    /// The available adapters that the request enables.
    fn sources_for(&self, search: &SearchConfig) -> Vec<Arc<dyn SourceAdapter>> {
        self.sources
            .iter()
            .filter(|s| search.sources.contains(&s.kind()))
            .cloned()
            .collect()
    }

    /// Run-level validation; nothing is started when this fails.
    pub fn validate(&self, request: &RunRequest) -> Result<(), RunError> {
        request.search.validate(&request.topic)?;
        if self.sources_for(&request.search).is_empty() {
            return Err(RunError::NoSourcesEnabled);
        }
        Ok(())
    }

    /// Execute a validated request to completion.
    pub async fn run(
        &self,
        request: &RunRequest,
        cancel: CancellationToken,
        observer: Arc<dyn PipelineObserver>,
    ) -> RunReport {
        let topic = request.topic.trim();
        let tenant = request.user_id.as_deref();
        let top_k = request.search.top_k;
        observer.on_phase(RunPhase::Scraping);

        let round_observer = observer.clone();
        let progress: ProgressCallback =
            Arc::new(move |p: &RoundProgress| round_observer.on_round(p));
        let controller = AccumulationController::new(
            self.sources_for(&request.search),
            self.filter.clone(),
            request.search.clone(),
        )
        .with_progress(progress);

        let outcome = controller.run(topic, cancel.clone()).await;
        let mut report = RunReport {
            topic: topic.to_string(),
            phase: RunPhase::Scraping,
            stop_reason: outcome.stop_reason,
            rounds: outcome.rounds,
            candidates_found: outcome.candidates.len(),
            relevant_found: outcome.relevant.len(),
            fail_open_rounds: outcome.fail_open_rounds,
            selected: Vec::new(),
            selection_method: None,
            sink: None,
            sink_error: None,
            papers_analyzed: 0,
            error: None,
        };

        let relevant = outcome.relevant;
        if outcome.stop_reason == StopReason::Cancelled || cancel.is_cancelled() {
            return cancelled_with_relevant(report, relevant, top_k, observer.as_ref());
        }

        let selection = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            selection = self.selector.select(topic, relevant.clone(), top_k) => Some(selection),
        };
        let Some(selection) = selection.filter(|_| !cancel.is_cancelled()) else {
            return cancelled_with_relevant(report, relevant, top_k, observer.as_ref());
        };
        report.selection_method = Some(selection.method);
        report.selected = selection.papers;

        if let Some(sink) = &self.sink {
            match sink.store(tenant, &report.selected).await {
                Ok(sink_report) => {
                    if !sink_report.omitted_columns.is_empty() {
                        warn!(
                            topic,
                            omitted = ?sink_report.omitted_columns,
                            "Stored without some columns"
                        );
                    }
                    report.sink = Some(sink_report);
                }
                Err(e) => {
                    warn!(topic, error = %e, "Failed to store selected papers");
                    report.sink_error = Some(e.to_string());
                }
            }
        }

        if cancel.is_cancelled() {
            mark_cancelled(&mut report, observer.as_ref());
            return report;
        }

        match &self.downstream {
            Some(stage) if !report.selected.is_empty() => {
                observer.on_phase(RunPhase::Debating);
                info!(
                    topic,
                    stage = stage.name(),
                    papers = report.selected.len(),
                    "Handing selection to downstream stage"
                );
                let processed = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = stage.process(topic, tenant, &report.selected) => Some(result),
                };
                match processed {
                    None => {
                        mark_cancelled(&mut report, observer.as_ref());
                        return report;
                    }
                    Some(Ok(analyzed)) => {
                        report.papers_analyzed = analyzed;
                        report.phase = RunPhase::Complete;
                    }
                    Some(Err(e)) => {
                        error!(topic, stage = stage.name(), error = %e, "Downstream stage failed");
                        report.error = Some(e.to_string());
                        report.phase = RunPhase::Error;
                    }
                }
            }
            _ => report.phase = RunPhase::Complete,
        }

        observer.on_phase(report.phase);
        info!(
            topic,
            phase = %report.phase,
            selected = report.selected.len(),
            "Run finished"
        );
        report
    }
}

/// Record that cancellation was observed. Nothing after this point issues
/// model, storage or downstream calls.
fn mark_cancelled(report: &mut RunReport, observer: &dyn PipelineObserver) {
    report.phase = RunPhase::Cancelled;
    report.stop_reason = StopReason::Cancelled;
    observer.on_phase(RunPhase::Cancelled);
    info!(
        topic = report.topic.as_str(),
        relevant = report.relevant_found,
        selected = report.selected.len(),
        "Run cancelled, partial results kept"
    );
}

/// Cancelled before a selection was made: report the relevant set so far,
/// newest first.
fn cancelled_with_relevant(
    mut report: RunReport,
    mut relevant: Vec<CandidatePaper>,
    top_k: usize,
    observer: &dyn PipelineObserver,
) -> RunReport {
    sort_by_published_desc(&mut relevant);
    relevant.truncate(top_k);
    report.selected = relevant;
    report.selection_method = None;
    mark_cancelled(&mut report, observer);
    report
}
