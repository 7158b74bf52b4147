//! Paperscout CLI: find recent, relevant research papers on a topic.

mod commands;

use clap::Parser;
use paperscout_core::SourceKind;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Paperscout: multi-source research paper discovery
#[derive(Parser, Debug)]
#[command(name = "paperscout", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (its `.paperscout/config.toml` is loaded)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// LLM model to use
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Search for papers on a topic
    Search(SearchArgs),
    /// List the paper sources and whether they can be used
    Sources,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
struct SearchArgs {
    /// Research topic
    topic: String,

    /// Tenant to run and store results under
    #[arg(short, long)]
    user: Option<String>,

    /// Comma-separated sources (arxiv, semantic_scholar, openalex, biorxiv, web)
    #[arg(short, long, value_delimiter = ',')]
    sources: Vec<SourceKind>,

    /// Candidates requested from each source per round
    #[arg(long)]
    candidates: Option<usize>,

    /// Number of papers to return
    #[arg(short = 'k', long)]
    top: Option<usize>,

    /// Drop papers older than this many months (0 disables)
    #[arg(long)]
    max_age_months: Option<u32>,

    /// Maximum accumulation rounds
    #[arg(long)]
    max_rounds: Option<usize>,

    /// Maximum size of the candidate pool
    #[arg(long)]
    max_candidates: Option<usize>,

    /// Write the selection to this JSON file
    #[arg(short, long, conflicts_with = "no_sink")]
    output: Option<PathBuf>,

    /// Do not store the selection, even if a sink is configured
    #[arg(long)]
    no_sink: bool,

    /// Print the full run report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default configuration file in the workspace
    Init,
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "paperscout", "paperscout")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "paperscout.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let options = commands::GlobalOptions {
        model: cli.model,
        quiet: cli.quiet,
    };
    commands::handle_command(cli.command, &workspace, &options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_search_with_overrides() {
        let cli = Cli::try_parse_from([
            "paperscout",
            "search",
            "coral bleaching",
            "--sources",
            "arxiv,openalex",
            "-k",
            "5",
            "--max-age-months",
            "24",
            "--user",
            "alice",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Search(args) = cli.command else {
            panic!("expected search");
        };
        assert_eq!(args.topic, "coral bleaching");
        assert_eq!(args.sources, vec![SourceKind::Arxiv, SourceKind::Openalex]);
        assert_eq!(args.top, Some(5));
        assert_eq!(args.max_age_months, Some(24));
        assert_eq!(args.user.as_deref(), Some("alice"));
    }

    #[test]
    fn test_unknown_source_rejected() {
        let result = Cli::try_parse_from(["paperscout", "search", "t", "--sources", "scopus"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_output_conflicts_with_no_sink() {
        let result = Cli::try_parse_from([
            "paperscout",
            "search",
            "t",
            "--output",
            "out.json",
            "--no-sink",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_workspace_after_subcommand() {
        let cli = Cli::try_parse_from(["paperscout", "config", "show", "-w", "/tmp"]).unwrap();
        assert_eq!(cli.workspace, PathBuf::from("/tmp"));
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Show
            }
        ));
    }
}
