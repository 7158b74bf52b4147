//! Configuration system for Paperscout.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. Configuration
//! is loaded from `~/.config/paperscout/config.toml` and/or
//! `.paperscout/config.toml` in the workspace directory.

use crate::error::{ConfigError, RunError};
use crate::source::SourceKind;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoutConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub sink: SinkConfig,
}

impl ScoutConfig {
    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "anthropic" or "mock".
    pub provider: String,
    /// Model identifier (e.g., "claude-haiku-4-5").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Request timeout for one model call.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-haiku-4-5".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: None,
            max_tokens: 4096,
            timeout_secs: 90,
        }
    }
}

/// Parameters of one accumulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Enabled sources.
    pub sources: Vec<SourceKind>,
    /// Soft target passed to every adapter call.
    pub candidates_per_round: usize,
    /// Requested output size.
    pub top_k: usize,
    /// Recency cutoff in months; 0 disables the filter.
    pub max_age_months: u32,
    /// Hard cap on rounds (round 0 included).
    pub max_rounds: usize,
    /// Hard cap on the accumulated pool size.
    pub max_candidates: usize,
    /// Independent timeout for each adapter call.
    pub call_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            sources: SourceKind::ALL.to_vec(),
            candidates_per_round: 50,
            top_k: 20,
            max_age_months: 0,
            max_rounds: 4,
            max_candidates: 500,
            call_timeout_secs: 60,
        }
    }
}

impl SearchConfig {
    /// Run-level validation performed before a run is accepted.
    pub fn validate(&self, topic: &str) -> Result<(), RunError> {
        if topic.trim().is_empty() {
            return Err(RunError::EmptyTopic);
        }
        if self.sources.is_empty() {
            return Err(RunError::NoSourcesEnabled);
        }
        let positive = [
            ("top_k", self.top_k),
            ("candidates_per_round", self.candidates_per_round),
            ("max_rounds", self.max_rounds),
            ("max_candidates", self.max_candidates),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(RunError::InvalidParameter {
                    name: name.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if self.call_timeout_secs == 0 {
            return Err(RunError::InvalidParameter {
                name: "call_timeout_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Per-source connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub arxiv: ArxivConfig,
    #[serde(default)]
    pub semantic_scholar: SemanticScholarConfig,
    #[serde(default)]
    pub openalex: OpenAlexConfig,
    #[serde(default)]
    pub biorxiv: BiorxivConfig,
    #[serde(default)]
    pub web: WebSearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArxivConfig {
    pub base_url: String,
    /// Minimum spacing between requests.
    pub min_interval_ms: u64,
    /// Back-off before each retry on 429/503.
    pub retry_backoff_secs: Vec<u64>,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            base_url: "https://export.arxiv.org/api/query".to_string(),
            min_interval_ms: 3000,
            retry_backoff_secs: vec![5, 15, 30],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticScholarConfig {
    pub base_url: String,
    /// Optional; unauthenticated requests share a low public rate limit.
    pub api_key_env: String,
    pub min_interval_ms: u64,
}

impl Default for SemanticScholarConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.semanticscholar.org/graph/v1".to_string(),
            api_key_env: "S2_API_KEY".to_string(),
            min_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAlexConfig {
    pub base_url: String,
    /// Contact address for the polite pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub min_interval_ms: u64,
}

impl Default for OpenAlexConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openalex.org".to_string(),
            email: None,
            min_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiorxivConfig {
    pub base_url: String,
}

impl Default for BiorxivConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.biorxiv.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    /// SERP-style JSON endpoint; the web source is skipped while unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub api_key_env: String,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: "SERP_API_KEY".to_string(),
        }
    }
}

/// Where final selections are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    None,
    Json,
    Postgrest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub kind: SinkKind,
    /// Output file for the `json` sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Base URL of the PostgREST endpoint for the `postgrest` sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub key_env: String,
    pub table: String,
    /// Column holding the tenant id when results are stored per user.
    pub tenant_column: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::None,
            path: None,
            url: None,
            key_env: "SUPABASE_KEY".to_string(),
            table: "papers".to_string(),
            tenant_column: "user_id".to_string(),
        }
    }
}

/// Load configuration with layered merging.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `PAPERSCOUT_`)
/// 3. Workspace-local config (`.paperscout/config.toml`)
/// 4. User config (`~/.config/paperscout/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&ScoutConfig>,
) -> Result<ScoutConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(ScoutConfig::default()));

    if let Some(path) = user_config_path()
        && path.exists()
    {
        figment = figment.merge(Toml::file(&path));
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".paperscout").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // PAPERSCOUT_SEARCH__TOP_K, PAPERSCOUT_LLM__MODEL, ...
    figment = figment.merge(Env::prefixed("PAPERSCOUT_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// `~/.config/paperscout/config.toml` (platform equivalent).
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "paperscout", "paperscout")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
