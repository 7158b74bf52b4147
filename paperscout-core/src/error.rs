//! Error types for the Paperscout core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering sources, LLM calls, configuration, run validation and result sinks.
//! Only configuration and run-validation errors ever reach a trigger caller;
//! the rest are recovered inside a run and surface as warnings.

use std::path::PathBuf;

/// Top-level error type for the Paperscout core library.
#[derive(Debug, thiserror::Error)]
pub enum PaperscoutError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from source adapters. Always recovered by the controller.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("{source_name} request failed: {message}")]
    Request {
        source_name: String,
        message: String,
    },

    #[error("{source_name} returned status {status}")]
    Status { source_name: String, status: u16 },

    #[error("{source_name} rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        source_name: String,
        retry_after_secs: u64,
    },

    #[error("Failed to parse {source_name} response: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    #[error("{source_name} timed out after {timeout_secs}s")]
    Timeout {
        source_name: String,
        timeout_secs: u64,
    },

    #[error("{source_name} is not configured: {reason}")]
    NotConfigured { source_name: String, reason: String },
}

/// Errors from LLM provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider not supported: {provider}")]
    UnsupportedProvider { provider: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Run-level errors, reported synchronously before a run starts.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Topic must not be empty")]
    EmptyTopic,

    #[error("No sources enabled")]
    NoSourcesEnabled,

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("A run is already in progress for {key}")]
    AlreadyRunning { key: String },
}

/// Errors from result sinks.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink request failed: {message}")]
    Request { message: String },

    #[error("Sink returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Target table has no unique constraint on the upsert key")]
    MissingUniqueConstraint,

    #[error("Target table has no column '{column}'")]
    UnknownColumn { column: String },

    #[error("Sink IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A type alias for results using the top-level `PaperscoutError`.
pub type Result<T> = std::result::Result<T, PaperscoutError>;
