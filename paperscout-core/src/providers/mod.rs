//! LLM provider implementations.
//!
//! Use `create_provider()` to instantiate the appropriate provider based on config.

pub mod anthropic;

use crate::brain::{LlmProvider, MockLlmProvider};
use crate::config::LlmConfig;
use crate::error::LlmError;
use std::sync::Arc;

pub use anthropic::AnthropicProvider;

/// Create an LLM provider from configuration.
///
/// `"mock"` yields an offline provider whose answers are unparseable, so the
/// filter fails open and the selector falls back to date order.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.to_lowercase().as_str() {
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(config)?)),
        "mock" => Ok(Arc::new(MockLlmProvider::new())),
        other => Err(LlmError::UnsupportedProvider {
            provider: other.to_string(),
        }),
    }
}
