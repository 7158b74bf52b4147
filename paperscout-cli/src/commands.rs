//! Subcommand handlers.

use crate::{Commands, ConfigAction, SearchArgs};
use paperscout_core::config::{ScoutConfig, SinkKind, load_config};
use paperscout_core::providers::create_provider;
use paperscout_core::sink::build_sink;
use paperscout_core::{
    LlmFinalSelector, LlmRelevanceFilter, Pipeline, RunKey, RunPhase, RunRegistry, RunReport,
    RunRequest, SourceKind, SourceTier, TriggerOutcome,
};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Options that apply to every subcommand.
#[derive(Debug, Default)]
pub struct GlobalOptions {
    pub model: Option<String>,
    pub quiet: bool,
}

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    options: &GlobalOptions,
) -> anyhow::Result<()> {
    match command {
        Commands::Search(args) => handle_search(args, workspace, options).await,
        Commands::Sources => handle_sources(workspace),
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load(workspace: &Path, options: &GlobalOptions) -> anyhow::Result<ScoutConfig> {
    let mut config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(model) = &options.model {
        config.llm.model = model.clone();
    }
    Ok(config)
}

/// Fold command-line flags into the loaded configuration.
fn apply_search_overrides(config: &mut ScoutConfig, args: &SearchArgs) {
    let search = &mut config.search;
    if !args.sources.is_empty() {
        search.sources = args.sources.clone();
    }
    if let Some(n) = args.candidates {
        search.candidates_per_round = n;
    }
    if let Some(k) = args.top {
        search.top_k = k;
    }
    if let Some(months) = args.max_age_months {
        search.max_age_months = months;
    }
    if let Some(rounds) = args.max_rounds {
        search.max_rounds = rounds;
    }
    if let Some(cap) = args.max_candidates {
        search.max_candidates = cap;
    }

    if args.no_sink {
        config.sink.kind = SinkKind::None;
    } else if let Some(path) = &args.output {
        config.sink.kind = SinkKind::Json;
        config.sink.path = Some(path.clone());
    }
}

async fn handle_search(
    args: SearchArgs,
    workspace: &Path,
    options: &GlobalOptions,
) -> anyhow::Result<()> {
    let mut config = load(workspace, options)?;
    apply_search_overrides(&mut config, &args);

    let provider = create_provider(&config.llm)
        .map_err(|e| anyhow::anyhow!("Failed to create LLM provider: {}", e))?;
    let sources = paperscout_sources::build_sources(&config);
    let mut pipeline = Pipeline::new(
        sources,
        Arc::new(LlmRelevanceFilter::new(Arc::clone(&provider))),
        Arc::new(LlmFinalSelector::new(provider)),
    );
    if let Some(sink) = build_sink(&config.sink)? {
        pipeline = pipeline.with_sink(sink);
    }
    let registry = RunRegistry::new(Arc::new(pipeline));

    let mut request = RunRequest::new(args.topic.as_str(), config.search.clone());
    if let Some(user) = &args.user {
        request = request.with_user(user.as_str());
    }
    let key = RunKey::for_request(&request);
    match registry.trigger(request)? {
        TriggerOutcome::Started { run_id } => info!(%run_id, key = %key, "Run started"),
        TriggerOutcome::AlreadyRunning(status) => {
            info!(run_id = %status.run_id, key = %key, "Run already in progress")
        }
    }

    let report = wait_for_report(&registry, &key, options.quiet)
        .await
        .ok_or_else(|| anyhow::anyhow!("Run {} ended without a report", key))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
    }

    if report.phase == RunPhase::Error {
        anyhow::bail!(
            "Run failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Poll the run's status until it leaves the active phases, cancelling on
/// Ctrl-C, then collect its report.
async fn wait_for_report(registry: &RunRegistry, key: &RunKey, quiet: bool) -> Option<RunReport> {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let mut last_seen = None;
    let mut cancelled = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(status) = registry.status(key) else { break };
                if !status.phase.is_active() {
                    break;
                }
                let snapshot = (status.phase, status.round, status.papers_found);
                if !quiet && last_seen != Some(snapshot) {
                    eprintln!(
                        "  [{}] round {}: {} candidates, {} relevant",
                        status.phase, status.round, status.papers_found, status.papers_relevant
                    );
                    last_seen = Some(snapshot);
                }
            }
            signal = tokio::signal::ctrl_c(), if !cancelled => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                warn!(key = %key, "Interrupted, cancelling run");
                registry.cancel(key);
                cancelled = true;
            }
        }
    }

    registry.wait(key).await
}

/// Human-readable summary of a finished run.
fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} paper(s) for \"{}\" ({}; {} round(s), {} candidates, {} relevant)",
        report.selected.len(),
        report.topic,
        report.stop_reason,
        report.rounds,
        report.candidates_found,
        report.relevant_found,
    );
    if report.fail_open_rounds > 0 {
        let _ = writeln!(
            out,
            "  note: relevance check unavailable in {} round(s); those candidates were kept unfiltered",
            report.fail_open_rounds
        );
    }

    for (i, paper) in report.selected.iter().enumerate() {
        let date = paper
            .published
            .map(|d| d.to_string())
            .unwrap_or_else(|| "undated".to_string());
        let _ = write!(out, "{:>3}. {} ({})", i + 1, paper.title, date);
        if !paper.venue.is_empty() {
            let _ = write!(out, ", {}", paper.venue);
        }
        let _ = writeln!(out);
        if !paper.authors.is_empty() {
            let _ = writeln!(out, "     {}", paper.authors.join(", "));
        }
        let _ = writeln!(out, "     {}", paper.url);
    }

    if let Some(sink) = &report.sink {
        let _ = writeln!(out, "Stored {} paper(s) ({:?})", sink.written, sink.mode);
        if !sink.omitted_columns.is_empty() {
            let _ = writeln!(out, "  columns skipped: {}", sink.omitted_columns.join(", "));
        }
    }
    if let Some(err) = &report.sink_error {
        let _ = writeln!(out, "Storing results failed: {}", err);
    }
    out
}

fn handle_sources(workspace: &Path) -> anyhow::Result<()> {
    let config = load(workspace, &GlobalOptions::default())?;
    println!("Sources:");
    for kind in SourceKind::ALL {
        let enabled = config.search.sources.contains(&kind);
        let availability = match paperscout_sources::build_source(kind, &config.sources) {
            Ok(_) => "available".to_string(),
            Err(e) => format!("unavailable: {}", e),
        };
        println!(
            "  {:<18} {:<12} {:<9} {}",
            kind.to_string(),
            match kind.tier() {
                SourceTier::Paginated => "paginated",
                SourceTier::SingleShot => "single-shot",
            },
            if enabled { "enabled" } else { "disabled" },
            availability
        );
    }
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = init_config(workspace)?;
            println!("Configuration at: {}", config_path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace, &GlobalOptions::default())?;
            println!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

/// Write the default configuration unless one already exists.
fn init_config(workspace: &Path) -> anyhow::Result<std::path::PathBuf> {
    let config_dir = workspace.join(".paperscout");
    std::fs::create_dir_all(&config_dir)?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        info!(path = %config_path.display(), "Configuration file already exists");
        return Ok(config_path);
    }
    std::fs::write(&config_path, ScoutConfig::default().to_toml_string()?)?;
    info!(path = %config_path.display(), "Created default configuration");
    Ok(config_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperscout_core::{CandidatePaper, SelectionMethod, StopReason};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn report(selected: Vec<CandidatePaper>) -> RunReport {
        RunReport {
            topic: "coral reefs".to_string(),
            phase: RunPhase::Complete,
            stop_reason: StopReason::TargetReached,
            rounds: 2,
            candidates_found: 40,
            relevant_found: 12,
            fail_open_rounds: 0,
            selected,
            selection_method: Some(SelectionMethod::Ranked),
            sink: None,
            sink_error: None,
            papers_analyzed: 0,
            error: None,
        }
    }

    #[test]
    fn test_search_overrides_applied() {
        let mut config = ScoutConfig::default();
        let args = SearchArgs {
            topic: "t".to_string(),
            sources: vec![SourceKind::Arxiv],
            top: Some(3),
            max_rounds: Some(2),
            output: Some(PathBuf::from("out.json")),
            ..SearchArgs::default()
        };
        apply_search_overrides(&mut config, &args);
        assert_eq!(config.search.sources, vec![SourceKind::Arxiv]);
        assert_eq!(config.search.top_k, 3);
        assert_eq!(config.search.max_rounds, 2);
        assert_eq!(config.search.candidates_per_round, 50);
        assert_eq!(config.sink.kind, SinkKind::Json);
        assert_eq!(config.sink.path, Some(PathBuf::from("out.json")));
    }

    #[test]
    fn test_no_sink_clears_configured_sink() {
        let mut config = ScoutConfig::default();
        config.sink.kind = SinkKind::Postgrest;
        let args = SearchArgs {
            topic: "t".to_string(),
            no_sink: true,
            ..SearchArgs::default()
        };
        apply_search_overrides(&mut config, &args);
        assert_eq!(config.sink.kind, SinkKind::None);
        assert_eq!(config.search.sources, SourceKind::ALL.to_vec());
    }

    #[test]
    fn test_render_report_lists_papers() {
        let paper = CandidatePaper::new(
            "coral reefs",
            "Reef Recovery After Bleaching",
            "https://arxiv.org/abs/2401.00001",
            SourceKind::Arxiv,
        )
        .with_authors(vec!["Ana Ruiz".to_string(), "Li Wei".to_string()])
        .with_venue("arXiv");
        let text = render_report(&report(vec![paper]));

        assert!(text.starts_with("1 paper(s) for \"coral reefs\" (target_reached; 2 round(s)"));
        assert!(text.contains("  1. Reef Recovery After Bleaching (undated), arXiv"));
        assert!(text.contains("     Ana Ruiz, Li Wei"));
        assert!(text.contains("     https://arxiv.org/abs/2401.00001"));
        assert!(!text.contains("note:"));
    }

    #[test]
    fn test_render_report_notes_fail_open() {
        let mut r = report(Vec::new());
        r.fail_open_rounds = 1;
        r.sink_error = Some("HTTP 403".to_string());
        let text = render_report(&r);
        assert!(text.contains("relevance check unavailable in 1 round(s)"));
        assert!(text.contains("Storing results failed: HTTP 403"));
    }

    #[test]
    fn test_init_config_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_config(dir.path()).unwrap();
        assert!(path.ends_with(".paperscout/config.toml"));
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[search]"));

        std::fs::write(&path, "# edited\n").unwrap();
        init_config(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# edited\n");
    }
}
