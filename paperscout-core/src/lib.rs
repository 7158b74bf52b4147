//! # Paperscout Core
//!
//! Core library for Paperscout, a multi-source research paper finder.
//! Provides the candidate model, the source adapter contract, the
//! relevance-converging accumulation loop, final selection, result sinks,
//! the run registry, the LLM interface (brain), configuration and errors.

pub mod accumulate;
pub mod brain;
pub mod config;
pub mod error;
pub mod llm_json;
pub mod paper;
pub mod pipeline;
pub mod providers;
pub mod registry;
pub mod relevance;
pub mod selector;
pub mod sink;
pub mod source;
pub mod types;

// Re-export commonly used types at the crate root.
pub use accumulate::{
    AccumulationController, AccumulationOutcome, RoundProgress, RunState, StopReason,
};
pub use brain::{LlmProvider, MockLlmProvider};
pub use config::{ScoutConfig, SearchConfig, load_config};
pub use error::{
    ConfigError, LlmError, PaperscoutError, Result, RunError, SinkError, SourceError,
};
pub use paper::CandidatePaper;
pub use pipeline::{DownstreamStage, Pipeline, RunPhase, RunReport, RunRequest};
pub use registry::{RunKey, RunRegistry, RunStatus, TriggerOutcome};
pub use relevance::{LlmRelevanceFilter, RelevanceFilter, RelevanceVerdict};
pub use selector::{FinalSelector, LlmFinalSelector, Selection, SelectionMethod};
pub use sink::{JsonFileSink, MemorySink, PostgrestSink, ResultSink, SinkReport, WriteMode};
pub use source::{SourceAdapter, SourceCursor, SourceKind, SourcePage, SourceTier};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
