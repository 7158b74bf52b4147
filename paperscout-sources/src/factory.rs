//! Builds the enabled adapter set from configuration.

use crate::arxiv::ArxivSource;
use crate::biorxiv::BiorxivSource;
use crate::openalex::OpenAlexSource;
use crate::semantic_scholar::SemanticScholarSource;
use crate::web::WebSearchSource;
use paperscout_core::config::{SourcesConfig, WebSearchConfig};
use paperscout_core::{ScoutConfig, SourceAdapter, SourceError, SourceKind};
use std::sync::Arc;
use tracing::{info, warn};

fn build_web(config: &WebSearchConfig) -> Result<WebSearchSource, SourceError> {
    let not_configured = |reason: String| SourceError::NotConfigured {
        source_name: SourceKind::Web.to_string(),
        reason,
    };
    let endpoint = config
        .endpoint
        .clone()
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| not_configured("sources.web.endpoint is not set".to_string()))?;
    let key = std::env::var(&config.api_key_env)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| not_configured(format!("{} is not set", config.api_key_env)))?;
    WebSearchSource::new(endpoint, key)
}

/// Build one adapter.
pub fn build_source(
    kind: SourceKind,
    config: &SourcesConfig,
) -> Result<Arc<dyn SourceAdapter>, SourceError> {
    Ok(match kind {
        SourceKind::Arxiv => Arc::new(ArxivSource::new(&config.arxiv)?),
        SourceKind::SemanticScholar => {
            Arc::new(SemanticScholarSource::new(&config.semantic_scholar)?)
        }
        SourceKind::Openalex => Arc::new(OpenAlexSource::new(&config.openalex)?),
        SourceKind::Biorxiv => Arc::new(BiorxivSource::new(&config.biorxiv)?),
        SourceKind::Web => Arc::new(build_web(&config.web)?),
    })
}

/// Adapters for every source in `config.search.sources`.
///
/// Sources that cannot be configured are skipped with a warning; callers
/// reject the run if nothing remains.
pub fn build_sources(config: &ScoutConfig) -> Vec<Arc<dyn SourceAdapter>> {
    let mut sources: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    for kind in &config.search.sources {
        if sources.iter().any(|s| s.kind() == *kind) {
            continue;
        }
        match build_source(*kind, &config.sources) {
            Ok(adapter) => sources.push(adapter),
            Err(e) => warn!(source = %kind, error = %e, "Source unavailable, skipping"),
        }
    }
    info!(
        sources = ?sources.iter().map(|s| s.kind()).collect::<Vec<_>>(),
        "Source adapters ready"
    );
    sources
}
